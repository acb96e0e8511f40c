// forum-common: chat types and wire protocol shared by the forum server and its clients

pub mod protocol;
pub mod types;
