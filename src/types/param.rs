//! Statement arguments.

use super::value::{Integer, Value};
use crate::error::{Error, Result};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Shared destination of an OUT parameter.
///
/// The caller keeps a clone and reads it after `exec` returns.
#[derive(Debug, Default)]
pub struct Slot<T>(Arc<Mutex<T>>);

impl<T> Slot<T> {
    pub fn new(value: T) -> Self {
        Self(Arc::new(Mutex::new(value)))
    }

    pub fn set(&self, value: T) {
        *self.lock() = value;
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> Slot<T> {
    pub fn get(&self) -> T {
        self.lock().clone()
    }
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

/// An OUT parameter destination, typed by what the caller wants back.
#[derive(Debug, Clone)]
pub enum Output {
    /// Text; the bind buffer holds at least `capacity` bytes plus NUL.
    Str { slot: Slot<String>, capacity: usize },
    I8(Slot<i8>),
    I16(Slot<i16>),
    I32(Slot<i32>),
    I64(Slot<i64>),
    Isize(Slot<isize>),
    U8(Slot<u8>),
    U16(Slot<u16>),
    U32(Slot<u32>),
    U64(Slot<u64>),
    Usize(Slot<usize>),
    F32(Slot<f32>),
    F64(Slot<f64>),
    Bool(Slot<bool>),
    /// Any other destination. Bound as NULL and never written back.
    Other(Slot<Value>),
}

impl Output {
    /// A text destination able to receive `capacity` bytes.
    pub fn text(slot: &Slot<String>, capacity: usize) -> Self {
        Output::Str {
            slot: slot.clone(),
            capacity,
        }
    }
}

macro_rules! output_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<&Slot<$ty>> for Output {
                fn from(slot: &Slot<$ty>) -> Self {
                    Output::$variant(slot.clone())
                }
            }
        )*
    };
}

output_from!(
    i8 => I8, i16 => I16, i32 => I32, i64 => I64, isize => Isize,
    u8 => U8, u16 => U16, u32 => U32, u64 => U64, usize => Usize,
    f32 => F32, f64 => F64, bool => Bool, Value => Other,
);

impl From<&Slot<String>> for Output {
    fn from(slot: &Slot<String>) -> Self {
        Output::Str {
            slot: slot.clone(),
            capacity: 0,
        }
    }
}

/// Input value or OUT destination.
#[derive(Debug, Clone)]
pub enum Arg {
    In(Value),
    Out(Output),
}

/// One statement argument.
#[derive(Debug, Clone)]
pub struct NamedValue {
    /// 1-based position.
    pub ordinal: usize,
    /// Placeholder name without the leading colon; binds by position when
    /// absent.
    pub name: Option<String>,
    pub arg: Arg,
}

impl NamedValue {
    pub fn positional(ordinal: usize, value: impl Into<Value>) -> Self {
        Self {
            ordinal,
            name: None,
            arg: Arg::In(value.into()),
        }
    }

    pub fn named(ordinal: usize, name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            ordinal,
            name: Some(name.into()),
            arg: Arg::In(value.into()),
        }
    }

    pub fn out(ordinal: usize, output: impl Into<Output>) -> Self {
        Self {
            ordinal,
            name: None,
            arg: Arg::Out(output.into()),
        }
    }

    pub fn named_out(ordinal: usize, name: impl Into<String>, output: impl Into<Output>) -> Self {
        Self {
            ordinal,
            name: Some(name.into()),
            arg: Arg::Out(output.into()),
        }
    }
}

/// Number the values 1..=n as positional arguments.
pub fn positional<I, V>(values: I) -> Vec<NamedValue>
where
    I: IntoIterator<Item = V>,
    V: Into<Value>,
{
    values
        .into_iter()
        .enumerate()
        .map(|(i, v)| NamedValue::positional(i + 1, v))
        .collect()
}

/// Turns the current content of an OUT destination into the value whose
/// kind decides how it is bound.
pub trait ParameterConverter: Send + Sync {
    fn convert(&self, output: &Output) -> Result<Value>;
}

/// Integers become `i64`, floats become `f64`.
///
/// Unsigned values with the high bit set do not fit in `i64` and are
/// rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConverter;

impl ParameterConverter for DefaultConverter {
    fn convert(&self, output: &Output) -> Result<Value> {
        let int = |v: i64| -> Result<Value> { Ok(Value::Int(Integer::I64(v))) };
        match output {
            Output::Str { slot, .. } => Ok(Value::Text(slot.get())),
            Output::I8(s) => int(s.get().into()),
            Output::I16(s) => int(s.get().into()),
            Output::I32(s) => int(s.get().into()),
            Output::I64(s) => int(s.get()),
            Output::Isize(s) => int(s.get() as i64),
            Output::U8(s) => int(s.get().into()),
            Output::U16(s) => int(s.get().into()),
            Output::U32(s) => int(s.get().into()),
            Output::U64(s) => {
                let v = s.get();
                let v = i64::try_from(v).map_err(|_| {
                    Error::type_conversion(format!("uint64 values with high bit set are not supported: {}", v))
                })?;
                int(v)
            }
            Output::Usize(s) => {
                let v = s.get();
                let v = i64::try_from(v).map_err(|_| {
                    Error::type_conversion(format!("uint64 values with high bit set are not supported: {}", v))
                })?;
                int(v)
            }
            Output::F32(s) => Ok(Value::Float(s.get() as f64)),
            Output::F64(s) => Ok(Value::Float(s.get())),
            Output::Bool(s) => Ok(Value::Bool(s.get())),
            Output::Other(s) => Ok(s.get()),
        }
    }
}
