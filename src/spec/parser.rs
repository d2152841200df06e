//! Argument parser shared by fresh builds and reindex replays.
//!
//! Arguments are classified one at a time: options start with `-`, key
//! fields start with a digit, and a bare `OR` opens a new selection group.
//! Every accepted argument is recorded verbatim (modulo case normalization)
//! so it can be written to the header and replayed later.

use super::*;
use crate::utils::encoding::{MAX_POINTER, lenient_number, parse_leading_digits};
use std::fs;
use std::path::{Path, PathBuf};

/// What a parsed command line asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Build,
    /// `-E`: rebuild from the arguments stored in the existing output.
    Reindex,
    /// `-R`: patch the stored source name.
    Rename,
}

/// Options that differ between the two index kinds.
pub trait ModeOptions: Default + Clone + PartialEq + std::fmt::Debug {
    /// Extension given to a derived output name.
    const EXTENSION: &'static str;
    /// Whether key fields may carry the `X` exclusion suffix.
    const ALLOWS_EXCLUDED_FIELDS: bool;

    /// Apply one `-` option. Returns `Ok(false)` for an unknown letter.
    fn apply(&mut self, arg: &str) -> Result<bool>;

    /// Append the options that differ from the defaults, in argument form.
    fn render(&self, out: &mut Vec<String>);

    /// True when `-T` was given; rename honours it.
    fn text_marker(&self) -> bool;
}

/// Result of parsing a full command line.
#[derive(Debug, Clone)]
pub struct ParsedCommand<O> {
    pub input: PathBuf,
    pub output: PathBuf,
    pub spec: BuildSpec<O>,
    pub action: Action,
    pub verbosity: Verbosity,
    pub config_path: Option<PathBuf>,
}

/// Incremental parser over one argument list.
pub struct SpecParser<O> {
    name_len: usize,
    stored_len: usize,
    predicate_bytes: usize,
    or_pending: bool,
    action: Action,
    verbosity: Verbosity,
    config_path: Option<PathBuf>,
    spec: BuildSpec<O>,
}

impl<O: ModeOptions> SpecParser<O> {
    /// `name_len` is the length of the source name stored ahead of the
    /// arguments; it counts against the argument budget.
    pub fn new(name_len: usize) -> Self {
        Self {
            name_len,
            stored_len: 0,
            predicate_bytes: 0,
            or_pending: false,
            action: Action::Build,
            verbosity: Verbosity::Quiet,
            config_path: None,
            spec: BuildSpec::default(),
        }
    }

    pub fn accept(&mut self, arg: &str) -> Result<()> {
        let bytes = arg.as_bytes();
        let stored = if bytes.first() == Some(&b'-') {
            self.accept_option(arg)?;
            arg.to_string()
        } else if bytes.first().is_some_and(u8::is_ascii_digit) {
            self.accept_field(arg)?
        } else if arg.eq_ignore_ascii_case("OR") {
            if !self.spec.predicates.is_empty() {
                self.or_pending = true;
            }
            arg.to_string()
        } else {
            return Err(BuildError::invalid_parameter(arg));
        };

        if self.name_len + self.stored_len + stored.len() > MAX_ARGUMENT_BYTES {
            return Err(BuildError::TooLong("Too many arguments".into()));
        }
        self.stored_len += stored.len() + 1;
        self.spec.arguments.push(stored);
        Ok(())
    }

    fn accept_option(&mut self, arg: &str) -> Result<()> {
        let bytes = arg.as_bytes();
        let letter = bytes.get(1).map(u8::to_ascii_uppercase).unwrap_or(0);
        match letter {
            b'?' => return Err(BuildError::bad_argument("usage")),
            b'!' => self.verbosity = Verbosity::Extra,
            b'V' => self.verbosity = self.verbosity.max(Verbosity::Verbose),
            b'E' => self.action = Action::Reindex,
            b'R' => self.action = Action::Rename,
            b'C' => {
                let upper = arg.to_ascii_uppercase();
                if !upper.starts_with("-CFG=") || arg.len() <= 5 {
                    return Err(BuildError::invalid_parameter(arg));
                }
                self.config_path = Some(PathBuf::from(&arg[5..]));
            }
            b'P' => self.accept_predicate(arg)?,
            _ => {
                if !self.spec.options.apply(arg)? {
                    return Err(BuildError::invalid_value(arg));
                }
            }
        }
        Ok(())
    }

    /// Parse `n[-m]`, plus an `X` suffix where allowed. Returns the argument
    /// as it should be stored.
    fn accept_field(&mut self, arg: &str) -> Result<String> {
        if self.spec.fields.len() == MAX_FIELDS {
            return Err(BuildError::TooLong("Too many keys".into()));
        }
        let bytes = arg.as_bytes();
        let (start, mut used) = parse_leading_digits(bytes, 5);
        let mut end = start;
        if bytes.get(used) == Some(&b'-') {
            let (value, n) = parse_leading_digits(&bytes[used + 1..], 5);
            end = value;
            used += 1 + n;
        }
        let mut stored = arg.to_string();
        let mut exclude = false;
        if O::ALLOWS_EXCLUDED_FIELDS
            && bytes.get(used).is_some_and(|b| b.eq_ignore_ascii_case(&b'X'))
        {
            exclude = true;
            stored.replace_range(used..used + 1, "X");
            used += 1;
        }
        if used != bytes.len() || start == 0 || end < start || end as usize > MAX_RECORD_SIZE {
            return Err(BuildError::invalid_value(arg));
        }
        self.spec.fields.push(FieldSpec {
            offset: start as usize - 1,
            length: (end - start + 1) as usize,
            exclude,
        });
        Ok(stored)
    }

    /// Parse `-Pn[-m]<op><value>`.
    fn accept_predicate(&mut self, arg: &str) -> Result<()> {
        if self.spec.predicates.len() == MAX_PREDICATES {
            return Err(BuildError::TooLong("Too many selection parameters".into()));
        }
        let bytes = arg.as_bytes();
        let (start, mut pos) = parse_leading_digits(&bytes[2..], 5);
        pos += 2;
        let mut end = start;
        if bytes.get(pos) == Some(&b'-') {
            let (value, n) = parse_leading_digits(&bytes[pos + 1..], 5);
            end = value;
            pos += 1 + n;
        }
        if start == 0 || end < start || end as usize > MAX_RECORD_SIZE {
            return Err(BuildError::invalid_value(arg));
        }
        let length = (end - start + 1) as usize;

        let op = bytes.get(pos).map(u8::to_ascii_uppercase);
        let next = bytes.get(pos + 1).map(u8::to_ascii_uppercase);
        let (comparison, op_len) = match (op, next) {
            (Some(b'='), _) => (Comparison::Equal, 1),
            (Some(b'#'), _) => (Comparison::NotEqual, 1),
            (Some(b'E'), Some(b'Q')) => (Comparison::Equal, 2),
            (Some(b'N'), Some(b'E')) => (Comparison::NotEqual, 2),
            (Some(b'G'), Some(b'T')) => (Comparison::Greater, 2),
            (Some(b'G'), Some(b'E')) => (Comparison::GreaterOrEqual, 2),
            (Some(b'L'), Some(b'T')) => (Comparison::Less, 2),
            (Some(b'L'), Some(b'E')) => (Comparison::LessOrEqual, 2),
            _ => return Err(BuildError::invalid_value(arg)),
        };
        let raw = &bytes[pos + op_len..];
        if raw.is_empty() {
            return Err(BuildError::invalid_value(arg));
        }

        let string_compare = length > 1;
        let mut value = raw.to_vec();
        if string_compare {
            value.resize(length, b' ');
        }
        if self.predicate_bytes + value.len() >= MAX_PREDICATE_BYTES {
            return Err(BuildError::TooLong("Too many selection parameters".into()));
        }
        self.predicate_bytes += value.len() + 1;

        self.spec.predicates.push(SelectPredicate {
            offset: start as usize - 1,
            length,
            comparison,
            value,
            string_compare,
            or_group_start: std::mem::take(&mut self.or_pending),
        });
        Ok(())
    }

    pub fn finish(self) -> (BuildSpec<O>, Action, Verbosity, Option<PathBuf>) {
        (self.spec, self.action, self.verbosity, self.config_path)
    }
}

/// Parse `input [output] args...` into a command.
pub fn parse_command<O: ModeOptions>(args: &[String]) -> Result<ParsedCommand<O>> {
    let args = expand_option_files(args)?;
    if args.len() < 2 {
        return Err(BuildError::bad_argument("usage: input [output] key-spec... [options]"));
    }
    let input = PathBuf::from(&args[0]);
    let mut rest = args[1..].iter().peekable();

    let output = match rest.peek() {
        Some(second) if !is_argument_like(second) => {
            let out = with_extension(Path::new(second.as_str()), O::EXTENSION, false);
            rest.next();
            out
        }
        _ => with_extension(&input, O::EXTENSION, true),
    };

    let mut parser = SpecParser::<O>::new(args[0].len());
    for arg in rest {
        parser.accept(arg)?;
    }
    let (spec, action, verbosity, config_path) = parser.finish();
    Ok(ParsedCommand {
        input,
        output,
        spec,
        action,
        verbosity,
        config_path,
    })
}

/// Replay stored arguments into a specification, ignoring action flags.
pub fn parse_stored<O: ModeOptions>(name_len: usize, arguments: &[String]) -> Result<BuildSpec<O>> {
    let mut parser = SpecParser::<O>::new(name_len);
    for arg in arguments {
        parser.accept(arg)?;
    }
    Ok(parser.finish().0)
}

/// An option, or something shaped like a key field (`n` or `n-m`).
fn is_argument_like(arg: &str) -> bool {
    let bytes = arg.as_bytes();
    if bytes.first() == Some(&b'-') {
        return true;
    }
    let (_, mut used) = parse_leading_digits(bytes, usize::MAX);
    if used > 0 && bytes.get(used) == Some(&b'-') {
        used += 1 + parse_leading_digits(&bytes[used + 1..], usize::MAX).1;
    }
    used == bytes.len()
}

/// Give `path` the extension `ext`, replacing an existing one only when
/// `replace` is set.
pub fn with_extension(path: &Path, ext: &str, replace: bool) -> PathBuf {
    if replace || path.extension().is_none() {
        path.with_extension(ext)
    } else {
        path.to_path_buf()
    }
}

/// Replace every `-O=file` argument with the whitespace-separated tokens of
/// that file.
pub fn expand_option_files(args: &[String]) -> Result<Vec<String>> {
    let mut out = Vec::with_capacity(args.len());
    for arg in args {
        let is_optfile = arg.len() > 3 && arg[..3].eq_ignore_ascii_case("-O=");
        if is_optfile {
            let path = Path::new(&arg[3..]);
            let content = fs::read_to_string(path).map_err(|e| BuildError::open(path, e))?;
            out.extend(content.split_whitespace().map(str::to_string));
        } else {
            out.push(arg.clone());
        }
    }
    Ok(out)
}

fn share_mode(arg: &str) -> ShareMode {
    if arg.as_bytes().get(2).is_some_and(|b| b.eq_ignore_ascii_case(&b'R')) {
        ShareMode::SharedReadOnly
    } else {
        ShareMode::Shared
    }
}

fn render_share(share: ShareMode, out: &mut Vec<String>) {
    match share {
        ShareMode::Exclusive => {}
        ShareMode::Shared => out.push("-J".into()),
        ShareMode::SharedReadOnly => out.push("-JR".into()),
    }
}

/// Value after `-x=`, which must be present and non-empty.
fn required_value(arg: &str) -> Result<&str> {
    match arg.get(2..3) {
        Some("=") if arg.len() > 3 => Ok(&arg[3..]),
        _ => Err(BuildError::invalid_parameter(arg)),
    }
}

fn memory_kb(arg: &str) -> Result<usize> {
    let kb = lenient_number(required_value(arg)?) as usize;
    if kb == 0 {
        return Err(BuildError::invalid_value(arg));
    }
    Ok(kb)
}

impl ModeOptions for IndexOptions {
    const EXTENSION: &'static str = "isi";
    const ALLOWS_EXCLUDED_FIELDS: bool = false;

    fn apply(&mut self, arg: &str) -> Result<bool> {
        let letter = arg.as_bytes().get(1).map(u8::to_ascii_uppercase).unwrap_or(0);
        match letter {
            b'A' => self.memory_kb = Some(memory_kb(arg)?),
            b'B' => {
                let size = lenient_number(required_value(arg)?) as usize;
                if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&size) || !size.is_power_of_two() {
                    return Err(BuildError::invalid_value(arg));
                }
                self.block_size = size;
            }
            b'D' => self.allow_duplicates = true,
            b'F' => {
                self.ignore_duplicates = true;
                if arg.get(2..3) == Some("=") {
                    self.duplicate_file = Some(PathBuf::from(required_value(arg)?));
                }
            }
            b'J' => self.share = share_mode(arg),
            b'K' => self.key_tag_file = Some(PathBuf::from(required_value(arg)?)),
            b'S' => {
                self.fixed = true;
                self.fixed_length = None;
                if arg.get(2..3) == Some("=") && arg.len() > 3 {
                    let len = lenient_number(&arg[3..]) as usize;
                    if len == 0 || len > MAX_RECORD_SIZE {
                        return Err(BuildError::invalid_value(arg));
                    }
                    self.fixed_length = Some(len);
                }
            }
            b'T' => self.text_marker = true,
            b'W' => self.work_path = Some(PathBuf::from(required_value(arg)?)),
            b'X' => self.invert_selection = true,
            b'Y' => self.strict_eof = true,
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn render(&self, out: &mut Vec<String>) {
        if let Some(kb) = self.memory_kb {
            out.push(format!("-A={kb}"));
        }
        if self.block_size != DEFAULT_BLOCK_SIZE {
            out.push(format!("-B={}", self.block_size));
        }
        if self.allow_duplicates {
            out.push("-D".into());
        }
        if self.ignore_duplicates {
            match &self.duplicate_file {
                Some(path) => out.push(format!("-F={}", path.display())),
                None => out.push("-F".into()),
            }
        }
        render_share(self.share, out);
        if let Some(path) = &self.key_tag_file {
            out.push(format!("-K={}", path.display()));
        }
        if self.fixed {
            match self.fixed_length {
                Some(len) => out.push(format!("-S={len}")),
                None => out.push("-S".into()),
            }
        }
        if self.text_marker {
            out.push("-T".into());
        }
        if let Some(path) = &self.work_path {
            out.push(format!("-W={}", path.display()));
        }
        if self.invert_selection {
            out.push("-X".into());
        }
        if self.strict_eof {
            out.push("-Y".into());
        }
    }

    fn text_marker(&self) -> bool {
        self.text_marker
    }
}

impl ModeOptions for AimOptions {
    const EXTENSION: &'static str = "aim";
    const ALLOWS_EXCLUDED_FIELDS: bool = true;

    fn apply(&mut self, arg: &str) -> Result<bool> {
        let letter = arg.as_bytes().get(1).map(u8::to_ascii_uppercase).unwrap_or(0);
        match letter {
            b'A' => self.memory_kb = Some(memory_kb(arg)?),
            b'D' => self.distinct = true,
            b'F' => {
                if arg.get(2..3) == Some("=") {
                    let len = lenient_number(&arg[3..]) as usize;
                    if len == 0 || len > MAX_RECORD_SIZE {
                        return Err(BuildError::invalid_value(arg));
                    }
                    self.record_length = Some(len);
                }
                self.fixed = true;
            }
            b'J' => self.share = share_mode(arg),
            b'M' => self.wildcard = required_value(arg)?.as_bytes()[0],
            b'N' => {
                if arg.get(2..3) != Some("=") {
                    return Err(BuildError::invalid_parameter(arg));
                }
                let (add, digits) = match arg[3..].strip_prefix('+') {
                    Some(rest) => (true, rest),
                    None => (false, &arg[3..]),
                };
                let count = lenient_number(digits);
                if count == 0 || count > MAX_POINTER {
                    return Err(BuildError::invalid_value(arg));
                }
                self.add_primary = add;
                self.primary_records = Some(count);
            }
            b'S' => self.reclaim = true,
            b'T' => self.text_marker = true,
            b'X' => {
                if arg.len() > 2 {
                    if arg.get(2..3) != Some("=") {
                        return Err(BuildError::invalid_parameter(arg));
                    }
                    let count = lenient_number(&arg[3..]);
                    if count == 0 {
                        return Err(BuildError::invalid_value(arg));
                    }
                    self.secondary_records = count;
                } else {
                    self.invert_selection = true;
                }
            }
            b'Y' => self.strict_eof = true,
            b'Z' => {
                if arg.get(2..3) != Some("=") {
                    return Err(BuildError::invalid_parameter(arg));
                }
                let slots = lenient_number(&arg[3..]) as usize;
                if !(MIN_SLOT_COUNT..=MAX_SLOT_COUNT).contains(&slots) {
                    return Err(BuildError::invalid_value(arg));
                }
                self.slot_count = slots;
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn render(&self, out: &mut Vec<String>) {
        if let Some(kb) = self.memory_kb {
            out.push(format!("-A={kb}"));
        }
        if self.distinct {
            out.push("-D".into());
        }
        if self.fixed {
            match self.record_length {
                Some(len) => out.push(format!("-F={len}")),
                None => out.push("-F".into()),
            }
        }
        render_share(self.share, out);
        if self.wildcard != DEFAULT_WILDCARD {
            out.push(format!("-M={}", self.wildcard as char));
        }
        if let Some(count) = self.primary_records {
            let sign = if self.add_primary { "+" } else { "" };
            out.push(format!("-N={sign}{count}"));
        }
        if self.reclaim {
            out.push("-S".into());
        }
        if self.text_marker {
            out.push("-T".into());
        }
        if self.invert_selection {
            out.push("-X".into());
        }
        if self.secondary_records > 0 {
            out.push(format!("-X={}", self.secondary_records));
        }
        if self.strict_eof {
            out.push("-Y".into());
        }
        if self.slot_count != DEFAULT_SLOT_COUNT {
            out.push(format!("-Z={}", self.slot_count));
        }
    }

    fn text_marker(&self) -> bool {
        self.text_marker
    }
}
