//! Names of the agents this node exchanges envelopes with

pub const BACKUP: &str = "BACKUP";
pub const CAPTCHA: &str = "CAPTCHA";
pub const CLEAN: &str = "CLEAN";
pub const HIDE: &str = "HIDE";
pub const LANG: &str = "LANG";
pub const LONG: &str = "LONG";
pub const MANAGE: &str = "MANAGE";
pub const NOFLOOD: &str = "NOFLOOD";
pub const NOPORN: &str = "NOPORN";
pub const NOSPAM: &str = "NOSPAM";
pub const RECHECK: &str = "RECHECK";
pub const REGEX: &str = "REGEX";
pub const USER: &str = "USER";
pub const WARN: &str = "WARN";

