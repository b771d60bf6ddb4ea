//! Script representation: an ordered list of operations.
//!
//! The store persists scripts operation-by-operation with the opcode as a
//! short string and push data as hex, so opcodes round-trip through their
//! string names. Execution semantics live behind the
//! [`Dialect`](crate::dialect::Dialect) policy, not here.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ScriptError;

/// Script opcodes.
///
/// `Special` is the raw push: its data rides along in the operation. The
/// remaining variants are the stack and crypto words needed for the common
/// pay-to-pubkey and pay-to-pubkey-hash forms.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    Special,
    Pushdata1,
    Pushdata2,
    Pushdata4,
    Nop,
    Drop,
    Dup,
    Sha256,
    Hash160,
    Equal,
    EqualVerify,
    CheckSig,
    CodeSeparator,
}

impl Opcode {
    /// Short lowercase name as stored in the operations table.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Special => "special",
            Self::Pushdata1 => "pushdata1",
            Self::Pushdata2 => "pushdata2",
            Self::Pushdata4 => "pushdata4",
            Self::Nop => "nop",
            Self::Drop => "drop",
            Self::Dup => "dup",
            Self::Sha256 => "sha256",
            Self::Hash160 => "hash160",
            Self::Equal => "equal",
            Self::EqualVerify => "equalverify",
            Self::CheckSig => "checksig",
            Self::CodeSeparator => "codeseparator",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Opcode {
    type Err = ScriptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "special" => Ok(Self::Special),
            "pushdata1" => Ok(Self::Pushdata1),
            "pushdata2" => Ok(Self::Pushdata2),
            "pushdata4" => Ok(Self::Pushdata4),
            "nop" => Ok(Self::Nop),
            "drop" => Ok(Self::Drop),
            "dup" => Ok(Self::Dup),
            "sha256" => Ok(Self::Sha256),
            "hash160" => Ok(Self::Hash160),
            "equal" => Ok(Self::Equal),
            "equalverify" => Ok(Self::EqualVerify),
            "checksig" => Ok(Self::CheckSig),
            "codeseparator" => Ok(Self::CodeSeparator),
            other => Err(ScriptError::UnknownOpcode(other.to_string())),
        }
    }
}

/// One script operation: an opcode and its optional push data.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Operation {
    pub code: Opcode,
    pub data: Option<Vec<u8>>,
}

/// An ordered sequence of operations.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct Script(Vec<Operation>);

impl Script {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push_operation(&mut self, op: Operation) {
        self.0.push(op);
    }

    pub fn operations(&self) -> &[Operation] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Canonical byte encoding.
    ///
    /// `Special` pushes write a length byte (< 76) followed by the data; the
    /// explicit pushdata forms write their marker byte and sized length.
    /// Non-push words write their fixed byte.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::new();
        for op in &self.0 {
            match op.code {
                Opcode::Special => {
                    let bytes = op.data.as_deref().unwrap_or(&[]);
                    debug_assert!(bytes.len() < 76);
                    data.push(bytes.len() as u8);
                    data.extend_from_slice(bytes);
                }
                Opcode::Pushdata1 => {
                    let bytes = op.data.as_deref().unwrap_or(&[]);
                    data.push(0x4c);
                    data.push(bytes.len() as u8);
                    data.extend_from_slice(bytes);
                }
                Opcode::Pushdata2 => {
                    let bytes = op.data.as_deref().unwrap_or(&[]);
                    data.push(0x4d);
                    data.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
                    data.extend_from_slice(bytes);
                }
                Opcode::Pushdata4 => {
                    let bytes = op.data.as_deref().unwrap_or(&[]);
                    data.push(0x4e);
                    data.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                    data.extend_from_slice(bytes);
                }
                Opcode::Nop => data.push(0x61),
                Opcode::Drop => data.push(0x75),
                Opcode::Dup => data.push(0x76),
                Opcode::Sha256 => data.push(0xa8),
                Opcode::Hash160 => data.push(0xa9),
                Opcode::Equal => data.push(0x87),
                Opcode::EqualVerify => data.push(0x88),
                Opcode::CheckSig => data.push(0xac),
                Opcode::CodeSeparator => data.push(0xab),
            }
        }
        data
    }
}

/// Encode bytes as lowercase hex, as stored in the operations table.
pub fn encode_hex(data: &[u8]) -> String {
    let mut s = String::with_capacity(data.len() * 2);
    for byte in data {
        s.push_str(&format!("{byte:02x}"));
    }
    s
}

/// Decode lowercase or uppercase hex into bytes.
pub fn decode_hex(s: &str) -> Result<Vec<u8>, ScriptError> {
    if s.len() % 2 != 0 {
        return Err(ScriptError::InvalidHex(s.to_string()));
    }
    let mut out = Vec::with_capacity(s.len() / 2);
    for chunk in s.as_bytes().chunks(2) {
        let hi = (chunk[0] as char)
            .to_digit(16)
            .ok_or_else(|| ScriptError::InvalidHex(s.to_string()))?;
        let lo = (chunk[1] as char)
            .to_digit(16)
            .ok_or_else(|| ScriptError::InvalidHex(s.to_string()))?;
        out.push(((hi << 4) | lo) as u8);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_string_round_trip() {
        let all = [
            Opcode::Special,
            Opcode::Pushdata1,
            Opcode::Pushdata2,
            Opcode::Pushdata4,
            Opcode::Nop,
            Opcode::Drop,
            Opcode::Dup,
            Opcode::Sha256,
            Opcode::Hash160,
            Opcode::Equal,
            Opcode::EqualVerify,
            Opcode::CheckSig,
            Opcode::CodeSeparator,
        ];
        for code in all {
            assert_eq!(code.as_str().parse::<Opcode>().unwrap(), code);
        }
    }

    #[test]
    fn unknown_opcode_rejected() {
        let err = "frobnicate".parse::<Opcode>().unwrap_err();
        assert_eq!(err, ScriptError::UnknownOpcode("frobnicate".into()));
    }

    #[test]
    fn special_push_encoding() {
        let mut script = Script::new();
        script.push_operation(Operation {
            code: Opcode::Special,
            data: Some(vec![0xDE, 0xAD]),
        });
        assert_eq!(script.to_bytes(), vec![0x02, 0xDE, 0xAD]);
    }

    #[test]
    fn pushdata1_encoding() {
        let mut script = Script::new();
        script.push_operation(Operation {
            code: Opcode::Pushdata1,
            data: Some(vec![0x01; 3]),
        });
        assert_eq!(script.to_bytes(), vec![0x4c, 0x03, 0x01, 0x01, 0x01]);
    }

    #[test]
    fn fixed_word_encoding() {
        let mut script = Script::new();
        script.push_operation(Operation { code: Opcode::Dup, data: None });
        script.push_operation(Operation { code: Opcode::Hash160, data: None });
        script.push_operation(Operation { code: Opcode::CheckSig, data: None });
        assert_eq!(script.to_bytes(), vec![0x76, 0xa9, 0xac]);
    }

    #[test]
    fn empty_script_encodes_empty() {
        assert!(Script::new().to_bytes().is_empty());
        assert!(Script::new().is_empty());
    }

    #[test]
    fn hex_round_trip() {
        let data = vec![0x00, 0x7f, 0xff, 0x10];
        assert_eq!(decode_hex(&encode_hex(&data)).unwrap(), data);
    }

    #[test]
    fn hex_rejects_odd_length() {
        assert!(decode_hex("abc").is_err());
    }

    #[test]
    fn hex_rejects_non_hex() {
        assert!(decode_hex("zz").is_err());
    }
}
