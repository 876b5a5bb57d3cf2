//! A minimal "log it, then bubble a unit error" convention for plumbing code (socket I/O,
//! framing) that has nothing useful to add to the log line it already emitted. Public-facing
//! errors live in `cip::error::CipError` instead; this type is for the internals only.

use core::result;

#[doc(hidden)]
pub trait Ext<T, E> {
	fn ok_or(self, f: impl FnOnce(E)) -> Option<T>;
}

impl<T, E> Ext<T, E> for result::Result<T, E> {
	fn ok_or(self, f: impl FnOnce(E)) -> Option<T> {
		match self {
			Ok(v) => Some(v),
			Err(e) => {
				f(e);
				None
			}
		}
	}
}

pub type Result<T = (), E = ()> = result::Result<T, E>;

pub use Ext as _;
