//! Dispatch Router
//!
//! Maps `(sender, action, type)` to a handler through a static table. Every
//! accepted combination is listed explicitly, since senders hold different
//! capabilities:
//! - only MANAGE may add bad channels or operate on whitelist and exceptions
//! - only REGEX may push rule sets and ask for counters
//! - only BACKUP may roll a dataset back
//!
//! A short reverse table is consulted for any sender. Unmatched envelopes are
//! ignored.

use std::fmt;

use warden_core::agents::{
    BACKUP, CAPTCHA, CLEAN, HIDE, LANG, LONG, MANAGE, NOFLOOD, NOPORN, NOSPAM, RECHECK, REGEX,
    USER, WARN,
};
use warden_core::Envelope;

/// What to do with a routed envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    AddBad { allow_channels: bool },
    AddExcept,
    AddScore,
    AddWatch,
    AddWhite,
    Clear(&'static str),
    Declare,
    Deleted,
    KickUser,
    LeaveApprove,
    Refresh,
    RegexCount,
    RegexUpdate,
    RemoveBad,
    RemoveExcept,
    RemoveScore,
    RemoveWatch,
    RemoveWhite,
    Rollback,
    VersionAsk,
}

impl fmt::Display for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Clear(dataset) => write!(f, "clear {}", dataset),
            other => write!(f, "{:?}", other),
        }
    }
}

/// One row of the dispatch table
#[derive(Debug, Clone, Copy)]
pub struct Route {
    pub senders: &'static [&'static str],
    pub action: &'static str,
    pub action_type: &'static str,
    pub handler: Handler,
}

const SCORERS: &[&str] = &[CAPTCHA, CLEAN, LANG, LONG, NOFLOOD, NOPORN, NOSPAM, RECHECK, WARN];
const WATCHERS: &[&str] = &[CLEAN, LANG, LONG, NOFLOOD, NOPORN, NOSPAM, RECHECK];
const DECLARERS: &[&str] = &[CLEAN, LANG, LONG, NOFLOOD, NOPORN, NOSPAM, RECHECK, USER];

const fn route(
    senders: &'static [&'static str],
    action: &'static str,
    action_type: &'static str,
    handler: Handler,
) -> Route {
    Route {
        senders,
        action,
        action_type,
        handler,
    }
}

pub static ROUTES: &[Route] = &[
    route(SCORERS, "add", "bad", Handler::AddBad { allow_channels: false }),
    route(&[MANAGE], "add", "bad", Handler::AddBad { allow_channels: true }),
    route(SCORERS, "add", "score", Handler::AddScore),
    route(WATCHERS, "add", "watch", Handler::AddWatch),
    route(DECLARERS, "update", "declare", Handler::Declare),
    route(&[MANAGE], "add", "except", Handler::AddExcept),
    route(&[MANAGE], "add", "white", Handler::AddWhite),
    route(&[MANAGE], "clear", "bad", Handler::Clear("bad")),
    route(&[MANAGE], "clear", "except", Handler::Clear("except")),
    route(&[MANAGE], "clear", "user", Handler::Clear("user")),
    route(&[MANAGE], "clear", "watch", Handler::Clear("watch")),
    route(&[MANAGE], "clear", "white", Handler::Clear("white")),
    route(&[MANAGE], "leave", "approve", Handler::LeaveApprove),
    route(&[MANAGE, USER], "remove", "bad", Handler::RemoveBad),
    route(&[MANAGE], "remove", "except", Handler::RemoveExcept),
    route(&[MANAGE], "remove", "score", Handler::RemoveScore),
    route(&[MANAGE], "remove", "watch", Handler::RemoveWatch),
    route(&[MANAGE], "remove", "white", Handler::RemoveWhite),
    route(&[MANAGE], "update", "refresh", Handler::Refresh),
    route(&[REGEX], "regex", "update", Handler::RegexUpdate),
    route(&[REGEX], "regex", "count", Handler::RegexCount),
    route(&[HIDE], "version", "ask", Handler::VersionAsk),
    route(&[BACKUP], "backup", "rollback", Handler::Rollback),
];

/// Accepted from any sender
pub static REVERSE_ROUTES: &[(&str, &str, Handler)] = &[
    ("kick", "user", Handler::KickUser),
    ("update", "deleted", Handler::Deleted),
];

/// Handler for an envelope received by `local`, if any
pub fn route_envelope(envelope: &Envelope, local: &str) -> Option<Handler> {
    if !envelope.is_addressed_to(local) {
        return None;
    }

    let action = envelope.action.as_str();
    let action_type = envelope.action_type.as_str();

    if let Some((_, _, handler)) = REVERSE_ROUTES
        .iter()
        .find(|(a, t, _)| *a == action && *t == action_type)
    {
        return Some(*handler);
    }

    ROUTES
        .iter()
        .find(|r| {
            r.action == action
                && r.action_type == action_type
                && r.senders.contains(&envelope.from.as_str())
        })
        .map(|r| r.handler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(from: &str, to: &[&str], action: &str, action_type: &str) -> Envelope {
        Envelope::new(from, to, action, action_type, json!({}))
    }

    #[test]
    fn test_only_manage_adds_channels() {
        let from_manage = envelope(MANAGE, &["AVATAR"], "add", "bad");
        let from_nospam = envelope(NOSPAM, &["AVATAR"], "add", "bad");

        assert_eq!(
            route_envelope(&from_manage, "AVATAR"),
            Some(Handler::AddBad { allow_channels: true })
        );
        assert_eq!(
            route_envelope(&from_nospam, "AVATAR"),
            Some(Handler::AddBad { allow_channels: false })
        );
    }

    #[test]
    fn test_must_be_addressed() {
        let e = envelope(MANAGE, &["NOSPAM"], "add", "white");
        assert_eq!(route_envelope(&e, "AVATAR"), None);
        assert_eq!(route_envelope(&e, "NOSPAM"), Some(Handler::AddWhite));
    }

    #[test]
    fn test_unknown_combinations_ignored() {
        for (from, action, action_type) in [
            (NOSPAM, "add", "white"),
            (CAPTCHA, "add", "watch"),
            (WARN, "update", "declare"),
            (USER, "remove", "score"),
            (MANAGE, "regex", "update"),
            ("STRANGER", "add", "bad"),
            (MANAGE, "add", "nothing"),
        ] {
            let e = envelope(from, &["AVATAR"], action, action_type);
            assert_eq!(route_envelope(&e, "AVATAR"), None, "{} {}/{}", from, action, action_type);
        }
    }

    #[test]
    fn test_reverse_path_any_sender() {
        let e = envelope("STRANGER", &["AVATAR"], "kick", "user");
        assert_eq!(route_envelope(&e, "AVATAR"), Some(Handler::KickUser));

        let e = envelope(CAPTCHA, &["AVATAR"], "update", "deleted");
        assert_eq!(route_envelope(&e, "AVATAR"), Some(Handler::Deleted));
    }

    #[test]
    fn test_table_has_no_conflicts() {
        for (i, a) in ROUTES.iter().enumerate() {
            for b in &ROUTES[i + 1..] {
                if a.action == b.action && a.action_type == b.action_type {
                    assert!(
                        a.senders.iter().all(|s| !b.senders.contains(s)),
                        "{}/{} routed twice",
                        a.action,
                        a.action_type
                    );
                }
            }
        }
    }

    #[test]
    fn test_declare_and_regex_senders() {
        let e = envelope(USER, &["AVATAR"], "update", "declare");
        assert_eq!(route_envelope(&e, "AVATAR"), Some(Handler::Declare));

        let e = envelope(REGEX, &["AVATAR", "NOSPAM"], "regex", "count");
        assert_eq!(route_envelope(&e, "AVATAR"), Some(Handler::RegexCount));

        let e = envelope(BACKUP, &["AVATAR"], "backup", "rollback");
        assert_eq!(route_envelope(&e, "AVATAR"), Some(Handler::Rollback));
    }
}
