mod link;

pub use link::{AccessLog, IpAccessInfo, Link, Target};
