//! Response validation
//!
//! A [`Validator`] checks and possibly reshapes the `data` of a response
//! before it reaches the caller. A rejection becomes [`Error::Validation`]
//! on the call instead of a value.
//!
//! Any `Fn(Value) -> Result<Value, String>` closure is a validator, and
//! [`Shape<T>`] accepts exactly the values that deserialize into `T`.
//!
//! # Examples
//!
//! ```rust
//! use tether_core::schema::{Shape, Validator};
//! use serde_json::json;
//!
//! let shape = Shape::<u8>::new();
//! assert!(shape.validate(json!(7)).is_ok());
//! assert!(shape.validate(json!(300)).is_err());
//!
//! let non_empty = |v: serde_json::Value| match v.as_str() {
//!     Some(s) if !s.is_empty() => Ok(v),
//!     _ => Err("expected a non-empty string".to_string()),
//! };
//! assert!(non_empty.validate(json!("x")).is_ok());
//! ```

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;

/// Checks response data, returning the value to hand to the caller
pub trait Validator: Send + Sync {
    fn validate(&self, value: Value) -> std::result::Result<Value, String>;
}

impl<F> Validator for F
where
    F: Fn(Value) -> std::result::Result<Value, String> + Send + Sync,
{
    fn validate(&self, value: Value) -> std::result::Result<Value, String> {
        self(value)
    }
}

/// Validator accepting values that deserialize into `T`
pub struct Shape<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> Shape<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for Shape<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Shape<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shape<{}>", std::any::type_name::<T>())
    }
}

impl<T: DeserializeOwned> Validator for Shape<T> {
    fn validate(&self, value: Value) -> std::result::Result<Value, String> {
        match T::deserialize(&value) {
            Ok(_) => Ok(value),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// Run a validator, mapping a rejection onto [`Error::Validation`]
pub fn check(validator: &dyn Validator, value: Value) -> Result<Value> {
    validator.validate(value).map_err(Error::Validation)
}

/// Deserialize response data into `T`, mapping failures onto [`Error::Validation`]
pub fn parse<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::Validation(e.to_string()))
}
