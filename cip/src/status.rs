//! Human-readable lookups for the two status vocabularies this protocol uses: the CIP general
//! service status (one byte, carried in every Message Router reply) and the ENIP encapsulation
//! status (one `u32`, carried in every frame header). Ported from `original_source`'s
//! `errors.go`/`enip/status.go`.

/// Describes a CIP general status code (§6, 0-44), e.g. `cip_status_message(6) == "Partial transfer"`.
pub fn cip_status_message(status: u8) -> &'static str {
	match status {
		0 => "Success",
		1 => "Connection failure",
		2 => "Resource unavailable",
		3 => "Invalid parameter value",
		4 => "Path segment error",
		5 => "Path destination unknown",
		6 => "Partial transfer",
		7 => "Connection lost",
		8 => "Service not supported",
		9 => "Invalid attribute",
		10 => "Attribute list error",
		11 => "Already in requested mode/state",
		12 => "Object state conflict",
		13 => "Object already exists",
		14 => "Attribute not settable",
		15 => "Privilege violation",
		16 => "Device state conflict",
		17 => "Reply data too large",
		18 => "Fragmentation of a primitive value",
		19 => "Not enough data received",
		20 => "Attribute not supported",
		21 => "Too much data",
		22 => "Object does not exist",
		23 => "Service fragmentation sequence not in progress",
		24 => "No stored attribute data",
		25 => "Store operation failure",
		26 => "Routing failure, request packet too large",
		27 => "Routing failure, response packet too large",
		28 => "Missing attribute list entry data",
		29 => "Invalid attribute value list",
		30 => "Embedded service error",
		31 => "Vendor specific",
		32 => "Invalid parameter",
		33 => "Write once value or medium already written",
		34 => "Invalid reply received",
		35 => "Buffer overflow",
		36 => "Invalid message format",
		37 => "Key failure in path",
		38 => "Path size invalid",
		39 => "Unexpected attribute in list",
		40 => "Invalid member ID",
		41 => "Member not settable",
		42 => "Group 2 only server general failure",
		43 => "Unknown Modbus error",
		44 => "Attribute not gettable",
		_ => "Unknown error",
	}
}

/// Describes an ENIP encapsulation status code carried in a frame header.
pub fn encapsulation_status_message(status: u32) -> &'static str {
	match status {
		0x0000 => "Success",
		0x0001 => "Unsupported command",
		0x0002 => "Out of memory",
		0x0003 => "Incorrect data",
		0x0064 => "Invalid session",
		0x0065 => "Invalid length",
		0x0069 => "Unsupported version",
		_ => "General encapsulation failure",
	}
}
