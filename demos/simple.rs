use mask_acl::*;

const RESOURCES: &str = r#"[
    {
        "name": "Document",
        "behaviour": 0,
        "permissions": ["view", "edit", "submit", "revise"],
        "entries": {
            "role": {
                "guest": ["view"],
                "staff": ["[guest]", "edit", "submit", "revise"]
            }
        }
    },
    {
        "name": "News",
        "parent": "Document",
        "permissions": ["publish", "archive"],
        "entries": {
            "role": {
                "editor": ["[staff]", "publish", "archive"],
                "marketing": ["[staff]", "publish"]
            },
            "user": {
                "sally": ["archive"]
            }
        }
    },
    {
        "name": "Announcement",
        "behaviour": 1,
        "permissions": ["read", "comment", "archive"],
        "entries": {
            "role": {
                "guest": ["comment", "archive"],
                "staff": ["archive"]
            }
        }
    }
]"#;

fn main() -> Result<()> {
    env_logger::init();

    let loader = CacheLoader::new(ArrayLoader::from_json(RESOURCES)?, MemoryCache::new());
    let mut acl = Acl::new(loader);

    acl.register(RootProcessor::default())
        .register(RoleProcessor::default())
        .register(IdentifierProcessor::username());

    let mut guest     = User::new("guest").with_roles(vec!["guest"]);
    let mut marketing = User::new("sally").with_roles(vec!["marketing"]);
    let mut editor    = User::new("ed").with_roles(vec!["editor", "staff", "guest"]);
    let mut admin     = User::new("admin").with_root(true);

    // guests may only view documents
    assert!(acl.is_allowed(&mut guest, "Document", &["view"])?);
    assert!(acl.is_denied(&mut guest, "Document", &["edit"])?);

    // marketing inherits staff, sally may additionally archive news
    assert!(acl.is_allowed(&mut marketing, "News", &["view", "edit", "publish", "archive"])?);
    assert!(acl.is_allowed(&mut editor, "News", &["publish", "archive"])?);

    // announcements are open unless a role says otherwise, the least restricted role counts
    assert!(acl.is_allowed(&mut editor, "Announcement", &["read", "comment"])?);
    assert!(acl.is_denied(&mut editor, "Announcement", &["archive"])?);
    assert!(acl.is_denied(&mut guest, "Announcement", &["comment"])?);

    // admins get everything
    assert!(acl.is_allowed(&mut admin, "Announcement", &["read", "comment", "archive"])?);

    println!("sally on News: {:#b}", acl.mask(&mut marketing, "News")?);
    println!("ed on Announcement: {:#b}", acl.mask(&mut editor, "Announcement")?);

    Ok(())
} // main
