//! Read-only big-endian wrappers for fields of the FDT binary format.
//!
//! Every multi-byte value in a flattened devicetree is stored big-endian.
//! Wrapping the raw fields keeps accidental native-order reads out of the
//! parser: the only way to get a value out is [`Be::read`], which converts.

use core::fmt;

use dataview::Pod;

/// Integers that know how to convert themselves from big-endian storage.
pub trait ByteOrder: Copy {
    #[must_use]
    fn from_be(self) -> Self;
}

macro_rules! impl_byte_order {
    ($($t:ty),+) => {
        $(
            impl ByteOrder for $t {
                fn from_be(self) -> Self {
                    Self::from_be(self)
                }
            }
        )+
    };
}

impl_byte_order!(u32, u64);

/// A value stored in big-endian byte order.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Be<T>(T);

impl<T> Be<T>
where
    T: ByteOrder,
{
    /// Reads the value, converting to native endianness.
    pub fn read(&self) -> T {
        self.0.from_be()
    }
}

// SAFETY: repr(transparent) over a Pod integer, no padding.
unsafe impl<T> Pod for Be<T> where T: Pod {}

impl<T> fmt::Debug for Be<T>
where
    T: ByteOrder + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.read(), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_converts_from_be() {
        let be = Be(0x1234_5678_u32.to_be());
        assert_eq!(be.read(), 0x1234_5678);

        let be = Be(0xdead_beef_cafe_f00d_u64.to_be());
        assert_eq!(be.read(), 0xdead_beef_cafe_f00d);
    }
}
