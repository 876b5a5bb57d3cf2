//! Tag-name grammar (§4.2): `Name`, `Name[n]`, `Name[n,m,...]`, and a trailing bare integer
//! segment (`Name.7`) for bit-of-word addressing. Ported from `original_source`'s
//! `lib.ParseTagName`/`lib.IsBitWord`, without the regex dependency that isn't part of this
//! crate's stack — the same two grammars are recognised by hand.

/// The result of splitting a tag name into its addressable base and index list.
///
/// `base` keeps every `.`-separated segment of the original name except a trailing bit-index
/// suffix; `indices` is `[0]` when the name carries no bracketed or trailing-integer suffix at
/// all (matching the original's fallback of returning the whole name with a single zero index).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTag {
	pub base: String,
	pub indices: Vec<u32>,
}

/// Splits `tag_name` into its base and index list per §4.2's grammar.
pub fn parse(tag_name: &str) -> ParsedTag {
	if let Some((base, indices)) = parse_bracketed(tag_name) {
		return ParsedTag { base, indices };
	}

	if let Some((base, index)) = parse_trailing_integer(tag_name) {
		return ParsedTag { base, indices: vec![index] };
	}

	ParsedTag {
		base: tag_name.to_string(),
		indices: vec![0],
	}
}

/// True if `tag_name` is word-identifier characters, optionally `-`/`.`-separated, immediately
/// followed by `[`.
fn is_name_char(c: char) -> bool {
	c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-'
}

/// `^([\w.-]+)\[(\d+(,\d+)*)\]$`
fn parse_bracketed(tag_name: &str) -> Option<(String, Vec<u32>)> {
	let open = tag_name.find('[')?;
	if !tag_name.ends_with(']') {
		return None;
	}

	let base = &tag_name[..open];
	if base.is_empty() || !base.chars().all(is_name_char) {
		return None;
	}

	let inner = &tag_name[open + 1..tag_name.len() - 1];
	if inner.is_empty() {
		return None;
	}

	let mut indices = Vec::new();
	for part in inner.split(',') {
		if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
			return None;
		}
		indices.push(part.parse().ok()?);
	}

	Some((base.to_string(), indices))
}

/// `^([\w.-]+)\.(\d+)$`
fn parse_trailing_integer(tag_name: &str) -> Option<(String, u32)> {
	let dot = tag_name.rfind('.')?;
	let (base, suffix) = (&tag_name[..dot], &tag_name[dot + 1..]);

	if base.is_empty() || !base.chars().all(is_name_char) || suffix.is_empty() || !suffix.chars().all(|c| c.is_ascii_digit()) {
		return None;
	}

	Some((base.to_string(), suffix.parse().ok()?))
}

/// True if `tag_name` ends in a bare integer bit-index segment (`Tag.7`, not `Tag[7]`).
pub fn is_bit_word(tag_name: &str) -> bool {
	parse_trailing_integer(tag_name).is_some()
}

/// True if the string is entirely ASCII digits (a whole path segment that is just an index),
/// mirroring the original's `lib.IsInteger`.
pub fn is_integer(segment: &str) -> bool {
	!segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn plain_name_has_no_indices() {
		let parsed = parse("Counter");
		assert_eq!(parsed.base, "Counter");
		assert_eq!(parsed.indices, vec![0]);
	}

	#[test]
	fn single_bracketed_index() {
		let parsed = parse("Array[3]");
		assert_eq!(parsed.base, "Array");
		assert_eq!(parsed.indices, vec![3]);
	}

	#[test]
	fn multi_dimensional_index() {
		let parsed = parse("Grid[2,5]");
		assert_eq!(parsed.base, "Grid");
		assert_eq!(parsed.indices, vec![2, 5]);
	}

	#[test]
	fn trailing_integer_is_bit_index() {
		let parsed = parse("Flags.7");
		assert_eq!(parsed.base, "Flags");
		assert_eq!(parsed.indices, vec![7]);
		assert!(is_bit_word("Flags.7"));
	}

	#[test]
	fn bracketed_name_is_not_a_bit_word() {
		assert!(!is_bit_word("Array[3]"));
	}

	#[test]
	fn dotted_struct_member_without_trailing_digits_is_not_a_bit_word() {
		assert!(!is_bit_word("Program.Counter"));
		let parsed = parse("Program.Counter");
		assert_eq!(parsed.base, "Program.Counter");
		assert_eq!(parsed.indices, vec![0]);
	}

	#[test]
	fn is_integer_rejects_non_digits() {
		assert!(is_integer("42"));
		assert!(!is_integer("4a"));
		assert!(!is_integer(""));
	}
}
