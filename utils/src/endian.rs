//! Concrete little-endian wire-integer types.
//!
//! The teacher crate this is adapted from built these on top of `bilge`'s `Bitsized` trait so
//! that the same macro could produce endian wrappers for arbitrary-width bitfield integers.
//! Nothing in the ENIP/CIP wire format needs anything narrower than a byte, so that generality
//! is dropped in favour of three concrete newtypes over `u16`/`u32`/`u64`.

use crate::bytes::{Cast, Unaligned};

macro_rules! define {
	( $( $name:ident($int:ty) )* ) => {
		$(
			#[doc = concat!("A `", stringify!($int), "` stored on the wire in little-endian byte order.")]
			#[derive(Clone, Copy, Default, PartialEq, Eq)]
			#[repr(transparent)]
			pub struct $name($int);

			impl $name {
				/// Reads the value out in native byte order.
				#[inline(always)]
				pub const fn get(self) -> $int {
					<$int>::from_le(self.0)
				}
			}

			impl From<$int> for $name {
				#[inline(always)]
				fn from(value: $int) -> Self {
					Self(value.to_le())
				}
			}

			impl From<$name> for $int {
				#[inline(always)]
				fn from(value: $name) -> Self {
					value.get()
				}
			}

			impl core::fmt::Debug for $name {
				fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
					self.get().fmt(f)
				}
			}

			unsafe impl Cast for $name {}
			unsafe impl Unaligned for $name {}
		)*
	};
}

define!( U16Le(u16) U32Le(u32) U64Le(u64) );
