//! The simple-type table (§6.2 step 4): CodeView type indices below
//! `0x1000` name a fixed primitive rather than a record in the type
//! stream. Grounded in the `T_*` constants of `cvinfo.h` (the header the
//! DIA-based original and every CodeView-reading tool, including this
//! workspace's own record decoders, trace back to).

use pdbex_core::graph::BasicType;

const T_VOID: u32 = 0x0003;
const T_HRESULT: u32 = 0x0008;
const T_CHAR: u32 = 0x0010;
const T_SHORT: u32 = 0x0011;
const T_LONG: u32 = 0x0012;
const T_QUAD: u32 = 0x0013;
const T_UCHAR: u32 = 0x0020;
const T_USHORT: u32 = 0x0021;
const T_ULONG: u32 = 0x0022;
const T_UQUAD: u32 = 0x0023;
const T_BOOL08: u32 = 0x0030;
const T_REAL32: u32 = 0x0040;
const T_REAL64: u32 = 0x0041;
const T_REAL80: u32 = 0x0042;
const T_RCHAR: u32 = 0x0070;
const T_WCHAR: u32 = 0x0071;
const T_INT4: u32 = 0x0074;
const T_UINT4: u32 = 0x0075;
const T_CHAR16: u32 = 0x007a;
const T_CHAR32: u32 = 0x007b;
const T_CHAR8: u32 = 0x007c;

/// Returns the `(BasicType, size_in_bytes)` pair `index` names, or `None`
/// if it is not one of the simple types this driver recognizes (the
/// pointer-modifier and "indirect" variants of a simple type are not
/// decoded; only the direct forms driver-populated test fixtures and real
/// TPI streams commonly use are).
pub fn describe(index: u32) -> Option<(BasicType, u64)> {
    let pair = match index {
        T_VOID => (BasicType::Void, 0),
        T_HRESULT => (BasicType::Hresult, 4),
        T_CHAR => (BasicType::Char, 1),
        T_SHORT => (BasicType::Int16, 2),
        T_LONG => (BasicType::Int32, 4),
        T_QUAD => (BasicType::Int64, 8),
        T_UCHAR => (BasicType::UnsignedChar, 1),
        T_USHORT => (BasicType::UInt16, 2),
        T_ULONG => (BasicType::UInt32, 4),
        T_UQUAD => (BasicType::UInt64, 8),
        T_BOOL08 => (BasicType::Bool, 1),
        T_REAL32 => (BasicType::Float32, 4),
        T_REAL64 => (BasicType::Float64, 8),
        T_REAL80 => (BasicType::Float80, 10),
        T_RCHAR => (BasicType::SignedChar, 1),
        T_WCHAR => (BasicType::WideChar, 2),
        T_INT4 => (BasicType::Int32, 4),
        T_UINT4 => (BasicType::UInt32, 4),
        T_CHAR16 => (BasicType::Char16, 2),
        T_CHAR32 => (BasicType::Char32, 4),
        T_CHAR8 => (BasicType::Char8, 1),
        _ => return None,
    };
    Some(pair)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_simple_types_resolve() {
        assert_eq!(describe(T_INT4), Some((BasicType::Int32, 4)));
        assert_eq!(describe(T_REAL80), Some((BasicType::Float80, 10)));
    }

    #[test]
    fn unknown_index_is_none() {
        assert_eq!(describe(0x2000), None);
    }
}
