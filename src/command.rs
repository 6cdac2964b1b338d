//! AT command classification and the handler dispatch table.
//!
//! An input line such as `AT+CWJAP="ssid","pwd"` is classified into a
//! [`Command`] carrying the keyword (`AT+CWJAP`), the invocation kind
//! ([`CommandKind::Set`]) and the raw argument string. The device then looks
//! the keyword up in a [`HandlerTable`], a two-level map from keyword to a
//! fixed per-kind handler array, built once at startup from the command
//! group registrations in [`crate::groups`].
//!
//! # Classification rules
//!
//! - line contains `=` → [`Set`](CommandKind::Set), argument is everything
//!   after the first `=`
//! - line ends with `?` → [`Query`](CommandKind::Query)
//! - otherwise → [`Execute`](CommandKind::Execute)
//!
//! [`Test`](CommandKind::Test) exists in the table model for `AT+CMD?`
//! listings but is never produced by the classifier.

use std::collections::BTreeMap;
use std::fmt;

use crate::device::Device;

// ============================================================================
// Reply tokens
// ============================================================================

/// Successful command reply.
pub const OK: &str = "OK";
/// Malformed, missing or out-of-range argument.
pub const PARAM_ERROR: &str = "ERROR: PARAM";
/// Command not allowed in the current state.
pub const STATE_ERROR: &str = "ERROR: STATE";
/// Unknown command keyword.
pub const NO_COMMAND: &str = "AT+ERROR: CMD";
/// Known keyword, unsupported invocation kind.
pub const INVALID_TYPE: &str = "AT+ERROR: TYPE";

// ============================================================================
// Classification
// ============================================================================

/// Number of invocation kinds, the width of a [`TypeHandlers`] slot array.
pub const KIND_COUNT: usize = 4;

/// How a keyword was invoked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandKind {
    /// `AT+X=?`. Reserved; never produced by the classifier.
    Test = 0,
    /// `AT+X?`
    Query = 1,
    /// `AT+X=...`
    Set = 2,
    /// `AT+X`
    Execute = 3,
}

/// A single parsed command line. Ephemeral: built per line, dropped after
/// dispatch.
#[derive(Debug, PartialEq, Eq)]
pub struct Command<'a> {
    /// Command keyword including the `AT` prefix.
    pub keyword: &'a str,
    /// Invocation kind derived from the line shape.
    pub kind: CommandKind,
    /// Raw argument string (empty unless `kind` is `Set`).
    pub args: &'a str,
}

/// Classify one CR-stripped input line.
pub fn classify(line: &str) -> Command<'_> {
    if let Some(eq) = line.find('=') {
        Command {
            keyword: &line[..eq],
            kind: CommandKind::Set,
            args: &line[eq + 1..],
        }
    } else if let Some(keyword) = line.strip_suffix('?') {
        Command {
            keyword,
            kind: CommandKind::Query,
            args: "",
        }
    } else {
        Command {
            keyword: line,
            kind: CommandKind::Execute,
            args: "",
        }
    }
}

// ============================================================================
// Argument helpers
// ============================================================================

/// Split a SET argument string on commas, keeping quoted sections intact.
///
/// `0,"a,b",1` splits into `["0", "\"a,b\"", "1"]`.
pub fn split_args(args: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in args.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(&args[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&args[start..]);
    parts
}

/// Strip a matching pair of surrounding double quotes, or `None` if the
/// argument is not quoted.
pub fn unquote(arg: &str) -> Option<&str> {
    arg.strip_prefix('"')?.strip_suffix('"')
}

// ============================================================================
// Handler table
// ============================================================================

/// A command handler. Handlers receive a mutable borrow of the owning
/// [`Device`] (the non-owning capability reference command groups hold) and
/// the raw argument string, and are solely responsible for producing a reply.
pub type Handler = fn(&mut Device, &str);

/// Per-keyword handler slots, indexed by [`CommandKind`].
#[derive(Clone, Copy, Debug, Default)]
pub struct TypeHandlers {
    slots: [Option<Handler>; KIND_COUNT],
}

impl TypeHandlers {
    /// Empty slot set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one invocation kind (builder style).
    pub fn on(mut self, kind: CommandKind, handler: Handler) -> Self {
        self.slots[kind as usize] = Some(handler);
        self
    }

    /// Handler for `kind`, if registered.
    pub fn get(&self, kind: CommandKind) -> Option<Handler> {
        self.slots[kind as usize]
    }

    /// Whether any handler is registered for `kind`.
    pub fn supports(&self, kind: CommandKind) -> bool {
        self.slots[kind as usize].is_some()
    }
}

/// Keyword registered by more than one command group. The table merge is a
/// plain union; a collision is a configuration error surfaced at build time.
#[derive(Debug)]
pub struct DuplicateKeyword(pub &'static str);

impl fmt::Display for DuplicateKeyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "duplicate AT command keyword: {}", self.0)
    }
}

impl std::error::Error for DuplicateKeyword {}

/// Immutable keyword → per-kind handler table, merged from the command
/// groups at device construction. `BTreeMap` keeps `AT+CMD?` listings in a
/// stable order.
#[derive(Debug)]
pub struct HandlerTable {
    entries: BTreeMap<&'static str, TypeHandlers>,
}

impl HandlerTable {
    /// Merge group registrations into one table, rejecting collisions.
    pub fn build(
        groups: impl IntoIterator<Item = (&'static str, TypeHandlers)>,
    ) -> Result<Self, DuplicateKeyword> {
        let mut entries = BTreeMap::new();
        for (keyword, handlers) in groups {
            if entries.insert(keyword, handlers).is_some() {
                return Err(DuplicateKeyword(keyword));
            }
        }
        Ok(Self { entries })
    }

    /// Handlers registered for `keyword`.
    pub fn lookup(&self, keyword: &str) -> Option<&TypeHandlers> {
        self.entries.get(keyword)
    }

    /// All entries in listing order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &TypeHandlers)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }

    /// Number of registered keywords.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_dev: &mut Device, _args: &str) {}

    // ========================================================================
    // Classifier tests
    // ========================================================================

    #[test]
    fn classify_execute() {
        let cmd = classify("AT+CWQAP");
        assert_eq!(cmd.keyword, "AT+CWQAP");
        assert_eq!(cmd.kind, CommandKind::Execute);
        assert_eq!(cmd.args, "");
    }

    #[test]
    fn classify_query() {
        let cmd = classify("AT+CWINIT?");
        assert_eq!(cmd.keyword, "AT+CWINIT");
        assert_eq!(cmd.kind, CommandKind::Query);
        assert_eq!(cmd.args, "");
    }

    #[test]
    fn classify_set() {
        let cmd = classify("AT+CWINIT=1");
        assert_eq!(cmd.keyword, "AT+CWINIT");
        assert_eq!(cmd.kind, CommandKind::Set);
        assert_eq!(cmd.args, "1");
    }

    #[test]
    fn classify_set_with_empty_args() {
        let cmd = classify("AT+CWJAP=");
        assert_eq!(cmd.keyword, "AT+CWJAP");
        assert_eq!(cmd.kind, CommandKind::Set);
        assert_eq!(cmd.args, "");
    }

    #[test]
    fn classify_set_splits_on_first_equals() {
        let cmd = classify("AT+MQTTPUB=0,\"t\",\"k=v\",0,0");
        assert_eq!(cmd.keyword, "AT+MQTTPUB");
        assert_eq!(cmd.args, "0,\"t\",\"k=v\",0,0");
    }

    #[test]
    fn classify_question_mark_inside_set_args_stays_set() {
        let cmd = classify("AT+MQTTPUB=0,\"t\",\"why?\",0,0");
        assert_eq!(cmd.kind, CommandKind::Set);
    }

    #[test]
    fn classify_empty_line_is_execute() {
        let cmd = classify("");
        assert_eq!(cmd.keyword, "");
        assert_eq!(cmd.kind, CommandKind::Execute);
    }

    // ========================================================================
    // Argument splitting tests
    // ========================================================================

    #[test]
    fn split_plain_args() {
        assert_eq!(split_args("1,\"GB\",1,13"), vec!["1", "\"GB\"", "1", "13"]);
    }

    #[test]
    fn split_keeps_quoted_commas() {
        assert_eq!(split_args("0,\"a,b\",1"), vec!["0", "\"a,b\"", "1"]);
    }

    #[test]
    fn split_single_arg() {
        assert_eq!(split_args("1"), vec!["1"]);
    }

    #[test]
    fn split_empty_args() {
        assert_eq!(split_args(""), vec![""]);
    }

    #[test]
    fn split_trailing_comma_yields_empty_part() {
        assert_eq!(split_args("1,"), vec!["1", ""]);
    }

    #[test]
    fn unquote_quoted() {
        assert_eq!(unquote("\"ssid\""), Some("ssid"));
    }

    #[test]
    fn unquote_empty_quoted() {
        assert_eq!(unquote("\"\""), Some(""));
    }

    #[test]
    fn unquote_bare_is_none() {
        assert_eq!(unquote("ssid"), None);
    }

    #[test]
    fn unquote_half_quoted_is_none() {
        assert_eq!(unquote("\"ssid"), None);
        assert_eq!(unquote("ssid\""), None);
    }

    // ========================================================================
    // Handler table tests
    // ========================================================================

    #[test]
    fn table_lookup_and_kind_support() {
        let table = HandlerTable::build([(
            "AT+TEST",
            TypeHandlers::new()
                .on(CommandKind::Query, noop)
                .on(CommandKind::Set, noop),
        )])
        .unwrap();

        let handlers = table.lookup("AT+TEST").unwrap();
        assert!(handlers.supports(CommandKind::Query));
        assert!(handlers.supports(CommandKind::Set));
        assert!(!handlers.supports(CommandKind::Execute));
        assert!(!handlers.supports(CommandKind::Test));
        assert!(table.lookup("AT+OTHER").is_none());
    }

    #[test]
    fn table_rejects_duplicate_keyword() {
        let err = HandlerTable::build([
            ("AT+X", TypeHandlers::new().on(CommandKind::Execute, noop)),
            ("AT+X", TypeHandlers::new().on(CommandKind::Query, noop)),
        ])
        .unwrap_err();
        assert_eq!(err.0, "AT+X");
        assert!(err.to_string().contains("AT+X"));
    }

    #[test]
    fn table_iterates_in_keyword_order() {
        let table = HandlerTable::build([
            ("ATE0", TypeHandlers::new().on(CommandKind::Execute, noop)),
            ("AT", TypeHandlers::new().on(CommandKind::Execute, noop)),
            ("AT+CMD", TypeHandlers::new().on(CommandKind::Query, noop)),
        ])
        .unwrap();
        let keywords: Vec<_> = table.iter().map(|(k, _)| k).collect();
        assert_eq!(keywords, vec!["AT", "AT+CMD", "ATE0"]);
    }
}
