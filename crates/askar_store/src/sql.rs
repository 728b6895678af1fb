//! sql files

pub(crate) const SCHEMA: &str = include_str!("./sql/schema.sql");
pub(crate) const UPSERT_CONFIG: &str = include_str!("./sql/upsert_config.sql");
pub(crate) const SELECT_PROFILES: &str =
    include_str!("./sql/select_profiles.sql");
pub(crate) const SELECT_PROFILE: &str = include_str!("./sql/select_profile.sql");
pub(crate) const INSERT_PROFILE: &str = include_str!("./sql/insert_profile.sql");
pub(crate) const SELECT_ITEM_ID: &str = include_str!("./sql/select_item_id.sql");
pub(crate) const SELECT_ITEM: &str = include_str!("./sql/select_item.sql");
pub(crate) const SELECT_TAGS: &str = include_str!("./sql/select_tags.sql");
pub(crate) const INSERT_ITEM: &str = include_str!("./sql/insert_item.sql");
pub(crate) const UPDATE_ITEM: &str = include_str!("./sql/update_item.sql");
pub(crate) const INSERT_TAG: &str = include_str!("./sql/insert_tag.sql");
pub(crate) const INDY_RENAME: &str = include_str!("./sql/indy_rename.sql");
pub(crate) const INDY_DROP: &str = include_str!("./sql/indy_drop.sql");
