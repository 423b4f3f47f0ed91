use rand::Rng;

use super::Entry;
use crate::{
    value::Value,
    vm::{Vm, VmResult},
};

/// Largest value returned by `rand()`.
const RAND_MAX: i64 = 2_147_483_647;

pub(super) const FUNCTIONS: &[Entry] = &[
    ("sqrt", sqrt, Some(1)),
    ("sin", sin, Some(1)),
    ("cos", cos, Some(1)),
    ("tan", tan, Some(1)),
    ("asin", asin, Some(1)),
    ("acos", acos, Some(1)),
    ("atan", atan, Some(1)),
    ("atan2", atan2, Some(2)),
    ("log", log, Some(1)),
    ("log10", log10, Some(1)),
    ("exp", exp, Some(1)),
    ("pow", pow, Some(2)),
    ("floor", floor, Some(1)),
    ("ceil", ceil, Some(1)),
    ("fabs", fabs, Some(1)),
    ("abs", abs, Some(1)),
    ("rand", rand, Some(0)),
    ("srand", srand, Some(1)),
];

pub(super) fn install_constants(vm: &mut Vm) {
    vm.set_global("PI", Value::Float(std::f64::consts::PI));
    vm.set_global("RAND_MAX", Value::Integer(RAND_MAX));
}

fn unary(vm: &mut Vm, f: fn(f64) -> f64) -> VmResult<usize> {
    let x = vm.get_float(1)?;
    vm.push_float(f(x));
    Ok(1)
}

fn sqrt(vm: &mut Vm) -> VmResult<usize> {
    unary(vm, f64::sqrt)
}

fn sin(vm: &mut Vm) -> VmResult<usize> {
    unary(vm, f64::sin)
}

fn cos(vm: &mut Vm) -> VmResult<usize> {
    unary(vm, f64::cos)
}

fn tan(vm: &mut Vm) -> VmResult<usize> {
    unary(vm, f64::tan)
}

fn asin(vm: &mut Vm) -> VmResult<usize> {
    unary(vm, f64::asin)
}

fn acos(vm: &mut Vm) -> VmResult<usize> {
    unary(vm, f64::acos)
}

fn atan(vm: &mut Vm) -> VmResult<usize> {
    unary(vm, f64::atan)
}

fn log(vm: &mut Vm) -> VmResult<usize> {
    unary(vm, f64::ln)
}

fn log10(vm: &mut Vm) -> VmResult<usize> {
    unary(vm, f64::log10)
}

fn exp(vm: &mut Vm) -> VmResult<usize> {
    unary(vm, f64::exp)
}

fn floor(vm: &mut Vm) -> VmResult<usize> {
    unary(vm, f64::floor)
}

fn ceil(vm: &mut Vm) -> VmResult<usize> {
    unary(vm, f64::ceil)
}

fn fabs(vm: &mut Vm) -> VmResult<usize> {
    unary(vm, f64::abs)
}

/// `atan2(y, x)`
fn atan2(vm: &mut Vm) -> VmResult<usize> {
    let (y, x) = (vm.get_float(1)?, vm.get_float(2)?);
    vm.push_float(y.atan2(x));
    Ok(1)
}

fn pow(vm: &mut Vm) -> VmResult<usize> {
    let (x, y) = (vm.get_float(1)?, vm.get_float(2)?);
    vm.push_float(x.powf(y));
    Ok(1)
}

/// Integer absolute value.
fn abs(vm: &mut Vm) -> VmResult<usize> {
    let n = vm.get_integer(1)?;
    vm.push_integer(n.wrapping_abs());
    Ok(1)
}

/// Pseudo-random integer in `0..=RAND_MAX`.
fn rand(vm: &mut Vm) -> VmResult<usize> {
    let n = vm.rng().gen_range(0..=RAND_MAX);
    vm.push_integer(n);
    Ok(1)
}

fn srand(vm: &mut Vm) -> VmResult<usize> {
    let seed = vm.get_integer(1)?;
    vm.seed_rng(u64::from_le_bytes(seed.to_le_bytes()));
    Ok(0)
}
