//! Bit patterns and named groups of them.

use log::trace;


// Mask ///////////////////////////////////////////////////////////////////////////////////////////


/// An identified bit pattern. Every operation mutates the value in place and returns the mask
/// so calls may be chained.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Mask {
    identifier: String,
    value:      u32,
} // struct Mask

impl Mask {

    pub fn new<S: Into<String>>(identifier: S, value: u32) -> Self {
        Mask{identifier: identifier.into(), value}
    } // new

    #[inline]
    pub fn identifier(&self) -> &str {
        &self.identifier
    } // identifier

    #[inline]
    pub fn value(&self) -> u32 {
        self.value
    } // value

    #[inline]
    pub fn set(&mut self, value: u32) -> &mut Self {
        self.value = value;
        self
    } // set

    /// Bitwise OR.
    #[inline]
    pub fn add(&mut self, value: u32) -> &mut Self {
        self.value |= value;
        self
    } // add

    /// Bitwise AND-NOT.
    #[inline]
    pub fn sub(&mut self, value: u32) -> &mut Self {
        self.value &= !value;
        self
    } // sub

    /// Shifts left, dropping bits pushed past the top of the pattern.
    #[inline]
    pub fn lshift(&mut self, bits: u32) -> &mut Self {
        self.value = self.value.checked_shl(bits).unwrap_or(0);
        self
    } // lshift

    #[inline]
    pub fn rshift(&mut self, bits: u32) -> &mut Self {
        self.value = self.value.checked_shr(bits).unwrap_or(0);
        self
    } // rshift

    /// Returns true if every bit of `required` is set.
    #[inline]
    pub fn contains(&self, required: u32) -> bool {
        self.value & required == required
    } // contains

} // impl Mask


// MaskCollection /////////////////////////////////////////////////////////////////////////////////


/// Named, insertion ordered group of masks with unique identifiers.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MaskCollection {
    name:  String,
    masks: Vec<Mask>,
} // struct MaskCollection

impl MaskCollection {

    pub fn new<S: Into<String>>(name: S) -> Self {
        MaskCollection{name: name.into(), masks: vec![]}
    } // new

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    } // name

    /// Inserts a mask. A mask with the same identifier is replaced in place and returned.
    pub fn insert(&mut self, mask: Mask) -> Option<Mask> {
        trace!("inserting mask {} into {}", mask.identifier, self.name);
        match self.masks.iter_mut().find(|m| m.identifier == mask.identifier) {
            Some(existing) => Some(std::mem::replace(existing, mask)),
            None           => {
                self.masks.push(mask);
                None
            }, // None
        } // match
    } // insert

    pub fn get(&self, identifier: &str) -> Option<&Mask> {
        self.masks.iter().find(|m| m.identifier == identifier)
    } // get

    pub fn get_mut(&mut self, identifier: &str) -> Option<&mut Mask> {
        self.masks.iter_mut().find(|m| m.identifier == identifier)
    } // get_mut

    pub fn remove(&mut self, identifier: &str) -> Option<Mask> {
        let pos = self.masks.iter().position(|m| m.identifier == identifier)?;
        Some(self.masks.remove(pos))
    } // remove

    #[inline]
    pub fn contains(&self, identifier: &str) -> bool {
        self.get(identifier).is_some()
    } // contains

    #[inline]
    pub fn len(&self) -> usize {
        self.masks.len()
    } // len

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    } // is_empty

    pub fn iter(&self) -> impl Iterator<Item = &Mask> {
        self.masks.iter()
    } // iter

    /// A new mask named after the collection holding the OR of every member.
    pub fn total(&self) -> Mask {
        let value = self.masks.iter().fold(0, |acc, m| acc | m.value);
        Mask::new(self.name.clone(), value)
    } // total

} // impl MaskCollection

impl<'a> IntoIterator for &'a MaskCollection {
    type Item     = &'a Mask;
    type IntoIter = std::slice::Iter<'a, Mask>;

    fn into_iter(self) -> Self::IntoIter {
        self.masks.iter()
    } // into_iter

} // impl IntoIterator for &MaskCollection


// Tests //////////////////////////////////////////////////////////////////////////////////////////


// mod tests
