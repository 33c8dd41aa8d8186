//! Stream views handed to hooks, tables and externalizers

use crate::error::{MarshalError, MarshalResult};
use crate::model::{FromValue, Value};

/// Write side of a marshalling session
///
/// Inside a custom write hook or externalizer the primitive writes are
/// framed as block data; objects are written out of band and may be
/// interleaved freely.
pub trait ObjectOutput {
    /// Write a `boolean`
    fn write_bool(&mut self, value: bool) -> MarshalResult<()>;
    /// Write an unsigned byte
    fn write_u8(&mut self, value: u8) -> MarshalResult<()>;
    /// Write a `byte`
    fn write_i8(&mut self, value: i8) -> MarshalResult<()>;
    /// Write a `short`
    fn write_i16(&mut self, value: i16) -> MarshalResult<()>;
    /// Write a `char` (one UTF-16 code unit)
    fn write_char(&mut self, value: u16) -> MarshalResult<()>;
    /// Write an `int`
    fn write_i32(&mut self, value: i32) -> MarshalResult<()>;
    /// Write a `long`
    fn write_i64(&mut self, value: i64) -> MarshalResult<()>;
    /// Write a `float`
    fn write_f32(&mut self, value: f32) -> MarshalResult<()>;
    /// Write a `double`
    fn write_f64(&mut self, value: f64) -> MarshalResult<()>;
    /// Write raw bytes
    fn write_bytes(&mut self, bytes: &[u8]) -> MarshalResult<()>;
    /// Write a length-prefixed modified UTF-8 string
    fn write_utf(&mut self, value: &str) -> MarshalResult<()>;
    /// Write a value at an object position, sharing it if already written
    fn write_object(&mut self, value: &Value) -> MarshalResult<()>;
    /// Write a fresh copy that the reader may never back-reference
    fn write_object_unshared(&mut self, value: &Value) -> MarshalResult<()>;
    /// Write the serial fields of the object whose write hook is running
    fn default_write_object(&mut self) -> MarshalResult<()>;
    /// Push buffered bytes towards the sink
    fn flush(&mut self) -> MarshalResult<()>;
}

/// Read side of an unmarshalling session
pub trait ObjectInput {
    /// Read a `boolean`
    fn read_bool(&mut self) -> MarshalResult<bool>;
    /// Read an unsigned byte
    fn read_u8(&mut self) -> MarshalResult<u8>;
    /// Read a `byte`
    fn read_i8(&mut self) -> MarshalResult<i8>;
    /// Read a `short`
    fn read_i16(&mut self) -> MarshalResult<i16>;
    /// Read a `char`
    fn read_char(&mut self) -> MarshalResult<u16>;
    /// Read an `int`
    fn read_i32(&mut self) -> MarshalResult<i32>;
    /// Read a `long`
    fn read_i64(&mut self) -> MarshalResult<i64>;
    /// Read a `float`
    fn read_f32(&mut self) -> MarshalResult<f32>;
    /// Read a `double`
    fn read_f64(&mut self) -> MarshalResult<f64>;
    /// Fill `buf` completely
    fn read_fully(&mut self, buf: &mut [u8]) -> MarshalResult<()>;
    /// Read a length-prefixed modified UTF-8 string
    fn read_utf(&mut self) -> MarshalResult<String>;
    /// Read the value at an object position
    fn read_object(&mut self) -> MarshalResult<Value>;
    /// Read a value that may not have been, and may not later be, shared
    fn read_object_unshared(&mut self) -> MarshalResult<Value>;
    /// Read the serial fields of the object whose read hook is running
    fn default_read_object(&mut self) -> MarshalResult<()>;
}

impl dyn ObjectInput + '_ {
    /// Read an object and convert it to `T`
    pub fn read_object_as<T: FromValue>(&mut self) -> MarshalResult<T> {
        let value = self.read_object()?;
        cast(value)
    }
}

/// Convert a decoded value, reporting both type names on mismatch
pub fn cast<T: FromValue>(value: Value) -> MarshalResult<T> {
    T::from_value(value).map_err(|actual| MarshalError::TypeMismatch {
        expected: T::type_name(),
        actual: actual.type_name(),
    })
}
