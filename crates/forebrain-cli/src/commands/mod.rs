pub(crate) mod admin;
pub(crate) mod chat;
pub(crate) mod memory;
pub(crate) mod status;
