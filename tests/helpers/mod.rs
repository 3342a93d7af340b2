#![allow(dead_code)]

pub mod builders;
pub mod db;
pub mod transport;

pub use builders::{context, paired_device, OrganizationBuilder};
pub use db::TestDb;
pub use transport::{ScriptedTransport, Step};
