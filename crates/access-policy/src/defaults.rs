//! Built-in tables for the `medical_data` database.

use crate::model::{AccessPolicy, Action, Privilege, Resource, RoleRef, RoleSpec, UserSpec};

pub const MEDICAL_DB: &str = "medical_data";
pub const ADMISSIONS: &str = "admissions";

pub fn medical_data() -> AccessPolicy {
    let db = MEDICAL_DB;
    let whole = || Resource::database(db);

    let roles = vec![
        RoleSpec::new(
            "medical_admin",
            vec![Privilege::new(
                whole(),
                [
                    Action::Find,
                    Action::Insert,
                    Action::Update,
                    Action::Remove,
                    Action::CreateCollection,
                    Action::CreateIndex,
                    Action::DropCollection,
                    Action::DropDatabase,
                    Action::ListCollections,
                ],
            )],
        ),
        RoleSpec::new(
            "medical_user",
            vec![Privilege::new(
                Resource::collection(db, ADMISSIONS),
                [
                    Action::Find,
                    Action::Insert,
                    Action::Update,
                    Action::ListCollections,
                ],
            )],
        ),
        RoleSpec::new(
            "medical_viewer",
            vec![Privilege::new(
                whole(),
                [Action::Find, Action::ListCollections],
            )],
        ),
        RoleSpec::new(
            "medical_indexer",
            vec![Privilege::new(
                whole(),
                [
                    Action::CreateCollection,
                    Action::CreateIndex,
                    Action::CollMod,
                    Action::ListCollections,
                ],
            )],
        ),
    ];

    let bind = |role: &str| vec![RoleRef::new(role, db)];
    let users = vec![
        UserSpec::new("admin_medical", "Admin@123", bind("medical_admin")),
        UserSpec::new("user_medical", "User@123", bind("medical_user")),
        UserSpec::new("viewer_medical", "Viewer@123", bind("medical_viewer")),
        UserSpec::new("indexer_medical", "Indexer@123", bind("medical_indexer")),
    ];

    AccessPolicy {
        database: db.to_string(),
        roles,
        users,
    }
}
