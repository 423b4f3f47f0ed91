use std::{fmt::Write as _, iter::Peekable, str::Chars};

use regex::Regex;

use super::{Entry, check_args};
use crate::vm::{Vm, VmError, VmResult};

pub(super) const FUNCTIONS: &[Entry] = &[
    ("format", format, None),
    ("strip", strip, Some(1)),
    ("lstrip", lstrip, Some(1)),
    ("rstrip", rstrip, Some(1)),
    ("split", split, Some(2)),
    ("startswith", startswith, Some(2)),
    ("endswith", endswith, Some(2)),
    ("escape", escape, Some(1)),
    ("lower", lower, Some(1)),
    ("upper", upper, Some(1)),
    ("regexp_match", regexp_match, Some(2)),
    ("regexp_search", regexp_search, None),
];

fn index(n: usize) -> isize {
    isize::try_from(n).unwrap_or(isize::MAX)
}

/// One `%...` directive of a format string.
#[derive(Debug, Default)]
struct Directive {
    left: bool,
    zero: bool,
    plus: bool,
    space: bool,
    width: usize,
    precision: Option<usize>,
    conv: char,
}

fn parse_directive(chars: &mut Peekable<Chars<'_>>) -> VmResult<Directive> {
    let mut directive = Directive::default();
    while let Some(&c) = chars.peek() {
        match c {
            '-' => directive.left = true,
            '0' => directive.zero = true,
            '+' => directive.plus = true,
            ' ' => directive.space = true,
            _ => break,
        }
        chars.next();
    }
    directive.width = read_number(chars)?;
    if chars.peek() == Some(&'.') {
        chars.next();
        directive.precision = Some(read_number(chars)?);
    }
    directive.conv = chars
        .next()
        .ok_or_else(|| VmError::runtime("incomplete format directive"))?;
    Ok(directive)
}

/// Width and precision take at most this many digits.
const MAX_FORMAT_DIGITS: usize = 3;

fn read_number(chars: &mut Peekable<Chars<'_>>) -> VmResult<usize> {
    let mut n = 0usize;
    let mut digits = 0;
    while let Some(digit) = chars.peek().and_then(|c| c.to_digit(10)) {
        digits += 1;
        if digits > MAX_FORMAT_DIGITS {
            return Err(VmError::runtime("format too long"));
        }
        n = n * 10 + digit as usize;
        chars.next();
    }
    Ok(n)
}

impl Directive {
    fn sign(&self, negative: bool) -> &'static str {
        if negative {
            "-"
        } else if self.plus {
            "+"
        } else if self.space {
            " "
        } else {
            ""
        }
    }

    /// Pads `body` (which starts with `sign`) to the requested width.
    fn pad(&self, sign: &str, body: &str, numeric: bool) -> String {
        let len = sign.chars().count() + body.chars().count();
        let fill = self.width.saturating_sub(len);
        if self.left {
            format!("{sign}{body}{}", " ".repeat(fill))
        } else if self.zero && numeric {
            format!("{sign}{}{body}", "0".repeat(fill))
        } else {
            format!("{}{sign}{body}", " ".repeat(fill))
        }
    }
}

/// C-style `%e`: mantissa with `precision` digits and a signed two-digit exponent.
fn format_exp(f: f64, precision: usize, upper: bool) -> String {
    let rendered = format!("{f:.precision$e}");
    let (mantissa, exponent) = rendered.split_once('e').unwrap_or((&rendered, "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let sign = if exponent < 0 { '-' } else { '+' };
    let e = if upper { 'E' } else { 'e' };
    format!("{mantissa}{e}{sign}{:02}", exponent.unsigned_abs())
}

/// C-style `%g`: the shorter of `%f` and `%e`, trailing zeros removed.
fn format_general(f: f64, precision: usize, upper: bool) -> String {
    if f == 0.0 || !f.is_finite() {
        return crate::value::format_float(f).trim_end_matches(".0").to_owned();
    }
    let precision = precision.max(1);
    #[expect(clippy::cast_possible_truncation)]
    let exponent = f.abs().log10().floor() as i64;
    let p = i64::try_from(precision).unwrap_or(i64::MAX);
    if exponent < -4 || exponent >= p {
        let rendered = format_exp(f, precision - 1, upper);
        match rendered.split_once(if upper { 'E' } else { 'e' }) {
            Some((mantissa, exp)) if mantissa.contains('.') => {
                let mantissa = mantissa.trim_end_matches('0').trim_end_matches('.');
                format!("{mantissa}{}{exp}", if upper { 'E' } else { 'e' })
            }
            _ => rendered,
        }
    } else {
        let decimals = usize::try_from(p - 1 - exponent).unwrap_or(0);
        let rendered = format!("{f:.decimals$}");
        if rendered.contains('.') {
            rendered.trim_end_matches('0').trim_end_matches('.').to_owned()
        } else {
            rendered
        }
    }
}

/// `format(template, ...)` with printf-style directives.
fn format(vm: &mut Vm) -> VmResult<usize> {
    let argc = check_args(vm, "format", 1, usize::MAX)?;
    let template = vm.get_string(1)?.to_owned();
    let mut out = String::with_capacity(template.len());
    let mut next_arg = 2;
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }
        let directive = parse_directive(&mut chars)?;
        if next_arg > argc {
            return Err(VmError::runtime("not enough parameters for the given format string"));
        }
        let arg = index(next_arg);
        next_arg += 1;
        let piece = match directive.conv {
            'd' | 'i' => {
                let n = vm.get_integer(arg)?;
                directive.pad(directive.sign(n < 0), &n.unsigned_abs().to_string(), true)
            }
            'x' => directive.pad("", &format!("{:x}", vm.get_integer(arg)?), true),
            'X' => directive.pad("", &format!("{:X}", vm.get_integer(arg)?), true),
            'o' => directive.pad("", &format!("{:o}", vm.get_integer(arg)?), true),
            'c' => {
                let code = vm.get_integer(arg)?;
                let c = u32::try_from(code)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| VmError::runtime(format!("{code} is not a valid character")))?;
                directive.pad("", &c.to_string(), false)
            }
            'f' | 'F' => {
                let f = vm.get_float(arg)?;
                let precision = directive.precision.unwrap_or(6);
                directive.pad(directive.sign(f.is_sign_negative()), &format!("{:.precision$}", f.abs()), true)
            }
            'e' | 'E' => {
                let f = vm.get_float(arg)?;
                let body = format_exp(f.abs(), directive.precision.unwrap_or(6), directive.conv == 'E');
                directive.pad(directive.sign(f.is_sign_negative()), &body, true)
            }
            'g' | 'G' => {
                let f = vm.get_float(arg)?;
                let body = format_general(f.abs(), directive.precision.unwrap_or(6), directive.conv == 'G');
                directive.pad(directive.sign(f.is_sign_negative()), &body, true)
            }
            's' => {
                let text = vm.to_display_string(arg)?;
                let text: String = match directive.precision {
                    Some(limit) => text.chars().take(limit).collect(),
                    None => text,
                };
                directive.pad("", &text, false)
            }
            other => return Err(VmError::runtime(format!("invalid format directive '%{other}'"))),
        };
        out.push_str(&piece);
    }
    vm.push_string(&out);
    Ok(1)
}

fn map_string(vm: &mut Vm, f: fn(&str) -> String) -> VmResult<usize> {
    let result = f(vm.get_string(1)?);
    vm.push_string(&result);
    Ok(1)
}

fn strip(vm: &mut Vm) -> VmResult<usize> {
    map_string(vm, |s| s.trim().to_owned())
}

fn lstrip(vm: &mut Vm) -> VmResult<usize> {
    map_string(vm, |s| s.trim_start().to_owned())
}

fn rstrip(vm: &mut Vm) -> VmResult<usize> {
    map_string(vm, |s| s.trim_end().to_owned())
}

fn lower(vm: &mut Vm) -> VmResult<usize> {
    map_string(vm, str::to_lowercase)
}

fn upper(vm: &mut Vm) -> VmResult<usize> {
    map_string(vm, str::to_uppercase)
}

/// Backslash-escapes quotes, control characters and non-printable characters.
fn escape(vm: &mut Vm) -> VmResult<usize> {
    map_string(vm, |s| {
        let mut out = String::with_capacity(s.len());
        for c in s.chars() {
            match c {
                '\\' => out.push_str("\\\\"),
                '"' => out.push_str("\\\""),
                '\'' => out.push_str("\\'"),
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                '\0' => out.push_str("\\0"),
                '\u{7}' => out.push_str("\\a"),
                '\u{8}' => out.push_str("\\b"),
                '\u{b}' => out.push_str("\\v"),
                '\u{c}' => out.push_str("\\f"),
                c if c.is_control() => {
                    let _ = write!(out, "\\x{:02x}", u32::from(c));
                }
                c => out.push(c),
            }
        }
        out
    })
}

/// Splits at every occurrence of any separator character, dropping empty pieces.
fn split(vm: &mut Vm) -> VmResult<usize> {
    let text = vm.get_string(1)?;
    let separators = vm.get_string(2)?;
    let pieces: Vec<String> = text
        .split(|c| separators.contains(c))
        .filter(|piece| !piece.is_empty())
        .map(str::to_owned)
        .collect();

    vm.new_array(pieces.len());
    for (i, piece) in pieces.iter().enumerate() {
        vm.push_copy(-1)?;
        vm.push_integer(i64::try_from(i).unwrap_or(i64::MAX));
        vm.push_string(piece);
        vm.set()?;
    }
    Ok(1)
}

fn startswith(vm: &mut Vm) -> VmResult<usize> {
    let result = vm.get_string(1)?.starts_with(vm.get_string(2)?);
    vm.push_bool(result);
    Ok(1)
}

fn endswith(vm: &mut Vm) -> VmResult<usize> {
    let result = vm.get_string(1)?.ends_with(vm.get_string(2)?);
    vm.push_bool(result);
    Ok(1)
}

fn compile_regex(pattern: &str) -> VmResult<Regex> {
    Regex::new(pattern).map_err(|e| VmError::runtime(format!("invalid regular expression: {e}")))
}

/// True when the whole string matches the pattern.
fn regexp_match(vm: &mut Vm) -> VmResult<usize> {
    let re = compile_regex(&format!("^(?:{})$", vm.get_string(1)?))?;
    let matched = re.is_match(vm.get_string(2)?);
    vm.push_bool(matched);
    Ok(1)
}

/// `regexp_search(pattern, text, start = 0)` returns `{begin, end}` byte offsets or null.
fn regexp_search(vm: &mut Vm) -> VmResult<usize> {
    let argc = check_args(vm, "regexp_search", 2, 3)?;
    let re = compile_regex(vm.get_string(1)?)?;
    let start = if argc == 3 {
        usize::try_from(vm.get_integer(3)?).map_err(|_| VmError::runtime("search start cannot be negative"))?
    } else {
        0
    };
    let text = vm.get_string(2)?;
    let found = text
        .get(start..)
        .and_then(|rest| re.find(rest))
        .map(|m| (m.start() + start, m.end() + start));

    let Some((begin, end)) = found else {
        vm.push_null();
        return Ok(1);
    };
    vm.new_table();
    for (name, offset) in [("begin", begin), ("end", end)] {
        vm.push_copy(-1)?;
        vm.push_string(name);
        vm.push_integer(i64::try_from(offset).unwrap_or(i64::MAX));
        vm.new_slot()?;
    }
    Ok(1)
}
