pub mod db;
pub mod errors;
pub mod helpers;
pub mod migrations;
pub mod multipart;
pub mod query_params;
pub mod reply;
pub mod store;
