use std::{env, fs};

use chrono::{DateTime, Datelike, Local, Timelike, Utc};

use super::{Entry, check_args};
use crate::vm::{Vm, VmError, VmResult};

pub(super) const FUNCTIONS: &[Entry] = &[
    ("getenv", getenv, Some(1)),
    ("time", time, Some(0)),
    ("clock", clock, Some(0)),
    ("date", date, None),
    ("remove", remove, Some(1)),
    ("rename", rename, Some(2)),
];

fn getenv(vm: &mut Vm) -> VmResult<usize> {
    let value = env::var(vm.get_string(1)?);
    match value {
        Ok(value) => vm.push_string(&value),
        Err(_) => vm.push_null(),
    }
    Ok(1)
}

/// Seconds since the Unix epoch.
fn time(vm: &mut Vm) -> VmResult<usize> {
    vm.push_integer(Utc::now().timestamp());
    Ok(1)
}

/// Seconds of wall time since the VM was created.
fn clock(vm: &mut Vm) -> VmResult<usize> {
    vm.push_float(vm.started().elapsed().as_secs_f64());
    Ok(1)
}

/// `date(time = now, format = 'l')` returns a table of calendar fields.
///
/// Format `'u'` selects UTC, anything else local time.
fn date(vm: &mut Vm) -> VmResult<usize> {
    let argc = check_args(vm, "date", 0, 2)?;
    let timestamp = if argc >= 1 {
        vm.get_integer(1)?
    } else {
        Utc::now().timestamp()
    };
    let utc = argc == 2 && vm.get_string(2)? == "u";
    let when = DateTime::<Utc>::from_timestamp(timestamp, 0)
        .ok_or_else(|| VmError::runtime(format!("timestamp {timestamp} is out of range")))?;
    let fields = if utc {
        calendar_fields(&when)
    } else {
        calendar_fields(&when.with_timezone(&Local))
    };

    vm.new_table();
    for (name, value) in fields {
        vm.push_copy(-1)?;
        vm.push_string(name);
        vm.push_integer(value);
        vm.new_slot()?;
    }
    Ok(1)
}

fn calendar_fields<T: Datelike + Timelike>(when: &T) -> [(&'static str, i64); 8] {
    [
        ("sec", i64::from(when.second())),
        ("min", i64::from(when.minute())),
        ("hour", i64::from(when.hour())),
        ("day", i64::from(when.day())),
        ("month", i64::from(when.month0())),
        ("year", i64::from(when.year())),
        ("wday", i64::from(when.weekday().num_days_from_sunday())),
        ("yday", i64::from(when.ordinal0())),
    ]
}

fn remove(vm: &mut Vm) -> VmResult<usize> {
    let path = vm.get_string(1)?;
    fs::remove_file(path).map_err(|e| VmError::runtime(format!("cannot remove '{path}': {e}")))?;
    Ok(0)
}

fn rename(vm: &mut Vm) -> VmResult<usize> {
    let from = vm.get_string(1)?;
    let to = vm.get_string(2)?;
    fs::rename(from, to).map_err(|e| VmError::runtime(format!("cannot rename '{from}' to '{to}': {e}")))?;
    Ok(0)
}
