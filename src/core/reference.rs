//! Cross-reference strings stored inside record data.
//!
//! A reference is either a bare record id (scoped to the holder's owner) or a
//! full path such as `Owner.<owner>.Record.<id>` or
//! `Pack.<pack>.Owner.<owner>.Record.<id>`.

use lazy_static::lazy_static;
use regex::Regex;

use super::types::Container;

lazy_static! {
    static ref RECORD_PATH: Regex =
        Regex::new(r"^(?:(?P<prefix>[A-Za-z0-9_.-]+)\.)?Record\.(?P<id>[A-Za-z0-9_-]+)$")
            .unwrap_or_else(|err| panic!("invalid record path pattern: {err}"));
    static ref RECORD_ID: Regex = Regex::new(r"^[A-Za-z0-9_-]{1,64}$")
        .unwrap_or_else(|err| panic!("invalid record id pattern: {err}"));
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordRef<'a> {
    Bare(&'a str),
    Path {
        prefix: Option<&'a str>,
        record_id: &'a str,
    },
}

impl<'a> RecordRef<'a> {
    pub fn parse(raw: &'a str) -> Option<Self> {
        if let Some(captures) = RECORD_PATH.captures(raw) {
            let record_id = captures.name("id")?.as_str();
            let prefix = captures.name("prefix").map(|m| m.as_str());
            return Some(RecordRef::Path { prefix, record_id });
        }
        if RECORD_ID.is_match(raw) {
            return Some(RecordRef::Bare(raw));
        }
        None
    }

    pub fn record_id(&self) -> &'a str {
        match self {
            RecordRef::Bare(id) => id,
            RecordRef::Path { record_id, .. } => record_id,
        }
    }

    pub fn is_path(&self) -> bool {
        matches!(self, RecordRef::Path { .. })
    }

    /// Same reference shape, pointing at `new_id`.
    pub fn retarget(&self, new_id: &str) -> String {
        match self {
            RecordRef::Bare(_) => new_id.to_string(),
            RecordRef::Path {
                prefix: Some(prefix),
                ..
            } => format!("{}.Record.{}", prefix, new_id),
            RecordRef::Path { prefix: None, .. } => format!("Record.{}", new_id),
        }
    }
}

/// Path for an unowned record in `container`.
pub fn unowned_record_path(container: &Container, record_id: &str) -> String {
    match container {
        Container::World => format!("Record.{}", record_id),
        Container::Pack(pack) => format!("Pack.{}.Record.{}", pack, record_id),
    }
}
