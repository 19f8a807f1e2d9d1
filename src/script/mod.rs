//! Opcode-level script bytes, the [`Destination`] taxonomy, and the
//! template-matching solver (C1, spec.md §4.1). Scripts are a thin wrapper
//! over `Vec<u8>` the way the teacher's `Script { code: String, .. }` wraps
//! a textual program — same idea, opcode bytes instead of whitespace tokens,
//! because spec.md requires recognizing real structural prefixes (P2SH,
//! witness versions, the token marker) rather than evaluating a language.

pub mod address;
pub mod error;

use serde::{Deserialize, Serialize};

use crate::hash::Hash160;
use error::{ErrorKind, ScriptResult};

pub const MAX_SCRIPT_SIZE: usize = 10_000;

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    OP_0 = 0x00,
    OP_PUSHDATA1 = 0x4c,
    OP_PUSHDATA2 = 0x4d,
    OP_PUSHDATA4 = 0x4e,
    OP_1 = 0x51,
    OP_16 = 0x60,
    OP_IF = 0x63,
    OP_ELSE = 0x67,
    OP_ENDIF = 0x68,
    OP_RETURN = 0x6a,
    OP_DROP = 0x75,
    OP_DUP = 0x76,
    OP_EQUAL = 0x87,
    OP_EQUALVERIFY = 0x88,
    OP_HASH160 = 0xa9,
    OP_HASH256 = 0xaa,
    OP_CHECKSIG = 0xac,
    OP_CHECKMULTISIG = 0xae,
    OP_CHECKLOCKTIMEVERIFY = 0xb1,
    /// The reserved opcode boundary after which token metadata is embedded.
    /// Anything parsed after this byte is a [`TokenOp`] payload, not script.
    OP_TOKEN = 0xc0,
}

/// A single parsed script element: either an opcode or a data push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Elem {
    Op(u8),
    Push(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script(pub Vec<u8>);

impl Script {
    pub fn new() -> Self {
        Script(Vec::new())
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Script(bytes)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push_op(&mut self, op: Opcode) -> &mut Self {
        self.0.push(op as u8);
        self
    }

    pub fn push_data(&mut self, data: &[u8]) -> &mut Self {
        match data.len() {
            0..=0x4b => self.0.push(data.len() as u8),
            0x4c..=0xff => {
                self.0.push(Opcode::OP_PUSHDATA1 as u8);
                self.0.push(data.len() as u8);
            }
            _ => {
                self.0.push(Opcode::OP_PUSHDATA2 as u8);
                self.0.extend_from_slice(&(data.len() as u16).to_le_bytes());
            }
        }
        self.0.extend_from_slice(data);
        self
    }

    /// Parses the script into a flat element list, stopping (without error)
    /// at the first [`Opcode::OP_TOKEN`] marker — everything from there on is
    /// token-engine payload, not further script, addressed via
    /// [`Script::token_payload`].
    pub fn elements(&self) -> ScriptResult<Vec<Elem>> {
        if self.0.len() > MAX_SCRIPT_SIZE {
            return Err(Box::new(ErrorKind::ScriptTooLong(MAX_SCRIPT_SIZE, self.0.len())));
        }

        let mut out = Vec::new();
        let mut i = 0usize;
        while i < self.0.len() {
            let byte = self.0[i];
            if byte == Opcode::OP_TOKEN as u8 {
                break;
            }

            match byte {
                0x01..=0x4b => {
                    let len = byte as usize;
                    let end = i + 1 + len;
                    if end > self.0.len() {
                        return Err(Box::new(ErrorKind::TruncatedPush));
                    }
                    out.push(Elem::Push(self.0[(i + 1)..end].to_vec()));
                    i = end;
                }
                op if op == Opcode::OP_PUSHDATA1 as u8 => {
                    if i + 2 > self.0.len() {
                        return Err(Box::new(ErrorKind::TruncatedPush));
                    }
                    let len = self.0[i + 1] as usize;
                    let start = i + 2;
                    let end = start + len;
                    if end > self.0.len() {
                        return Err(Box::new(ErrorKind::TruncatedPush));
                    }
                    out.push(Elem::Push(self.0[start..end].to_vec()));
                    i = end;
                }
                op if op == Opcode::OP_PUSHDATA2 as u8 => {
                    if i + 3 > self.0.len() {
                        return Err(Box::new(ErrorKind::TruncatedPush));
                    }
                    let len = u16::from_le_bytes([self.0[i + 1], self.0[i + 2]]) as usize;
                    let start = i + 3;
                    let end = start + len;
                    if end > self.0.len() {
                        return Err(Box::new(ErrorKind::TruncatedPush));
                    }
                    out.push(Elem::Push(self.0[start..end].to_vec()));
                    i = end;
                }
                op => {
                    out.push(Elem::Op(op));
                    i += 1;
                }
            }
        }

        Ok(out)
    }

    /// Finds the [`Opcode::OP_TOKEN`] marker by walking the script the same
    /// way [`Self::elements`] does — skipping over push-data *contents* —
    /// rather than a raw byte scan, so a data push that happens to contain
    /// the byte `0xc0` is never mistaken for the marker opcode itself.
    fn marker_position(&self) -> Option<usize> {
        let mut i = 0usize;
        while i < self.0.len() {
            let byte = self.0[i];
            if byte == Opcode::OP_TOKEN as u8 {
                return Some(i);
            }
            i = match byte {
                0x01..=0x4b => i + 1 + byte as usize,
                op if op == Opcode::OP_PUSHDATA1 as u8 => {
                    if i + 2 > self.0.len() {
                        return None;
                    }
                    i + 2 + self.0[i + 1] as usize
                }
                op if op == Opcode::OP_PUSHDATA2 as u8 => {
                    if i + 3 > self.0.len() {
                        return None;
                    }
                    i + 3 + u16::from_le_bytes([self.0[i + 1], self.0[i + 2]]) as usize
                }
                _ => i + 1,
            };
            if i > self.0.len() {
                return None;
            }
        }
        None
    }

    /// The raw bytes after the [`Opcode::OP_TOKEN`] marker, if present.
    pub fn token_payload(&self) -> Option<&[u8]> {
        self.marker_position().map(|pos| &self.0[(pos + 1)..])
    }

    /// The script bytes before the token marker — the part that still
    /// determines the spending destination the way a plain script would.
    pub fn base(&self) -> Script {
        match self.marker_position() {
            Some(pos) => Script(self.0[..pos].to_vec()),
            None => self.clone(),
        }
    }

    pub fn is_token_script(&self) -> bool {
        self.marker_position().is_some()
    }
}

impl Default for Script {
    fn default() -> Self {
        Script::new()
    }
}

/// The spending-destination taxonomy (spec.md §4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    P2PK(Vec<u8>),
    P2PKH(Hash160),
    P2SH(Hash160),
    P2WPKH([u8; 20]),
    P2WSH([u8; 32]),
    Cltv(u32, Hash160),
    OfflineStake { stake_key_hash: Hash160, spend_key_hash: Hash160 },
    Null,
}

/// The template `kind` the solver reports, independent of the destination it
/// also resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    Nonstandard,
    Cltv,
    Pubkey,
    PubkeyHash,
    ScriptHash,
    Multisig,
    NullData,
    V0KeyHash,
    V0ScriptHash,
    OfflineStaking,
    NewToken,
    TransferToken,
    ReissueToken,
}

pub struct SolveResult {
    pub kind: ScriptKind,
    pub destination: Destination,
    pub solutions: Vec<Vec<u8>>,
}

/// Strictly ordered template matching, per spec.md §4.1: P2SH first, then the
/// token marker, then witness version-byte prefixes, then the offline
/// staking two-branch `IF` form, then the small template list.
pub fn solve(script: &Script) -> ScriptResult<SolveResult> {
    if let Some(result) = try_p2sh(script) {
        return Ok(result);
    }

    if script.is_token_script() {
        return solve_token(script);
    }

    if let Some(result) = try_witness(script)? {
        return Ok(result);
    }

    if let Some(result) = try_offline_staking(script)? {
        return Ok(result);
    }

    try_standard_templates(script)
}

fn try_p2sh(script: &Script) -> Option<SolveResult> {
    let b = &script.0;
    if b.len() == 23
        && b[0] == Opcode::OP_HASH160 as u8
        && b[1] == 0x14
        && b[22] == Opcode::OP_EQUAL as u8
    {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&b[2..22]);
        return Some(SolveResult {
            kind: ScriptKind::ScriptHash,
            destination: Destination::P2SH(hash),
            solutions: vec![hash.to_vec()],
        });
    }
    None
}

fn try_witness(script: &Script) -> ScriptResult<Option<SolveResult>> {
    let elems = script.elements()?;
    if elems.len() != 2 {
        return Ok(None);
    }
    let version = match &elems[0] {
        Elem::Op(op) if *op == Opcode::OP_0 as u8 => 0u8,
        _ => return Ok(None),
    };
    let program = match &elems[1] {
        Elem::Push(data) => data,
        _ => return Ok(None),
    };

    if version != 0 {
        return Ok(None);
    }

    match program.len() {
        20 => {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(program);
            Ok(Some(SolveResult {
                kind: ScriptKind::V0KeyHash,
                destination: Destination::P2WPKH(hash),
                solutions: vec![program.clone()],
            }))
        }
        32 => {
            let mut hash = [0u8; 32];
            hash.copy_from_slice(program);
            Ok(Some(SolveResult {
                kind: ScriptKind::V0ScriptHash,
                destination: Destination::P2WSH(hash),
                solutions: vec![program.clone()],
            }))
        }
        _ => Ok(None),
    }
}

/// `OP_IF <p2pkh to stake key> OP_ELSE <p2pkh to spend key> OP_ENDIF`.
fn try_offline_staking(script: &Script) -> ScriptResult<Option<SolveResult>> {
    let elems = script.elements()?;
    if elems.len() != 11 {
        return Ok(None);
    }
    let is_if = matches!(elems[0], Elem::Op(op) if op == Opcode::OP_IF as u8);
    let is_else = matches!(elems[5], Elem::Op(op) if op == Opcode::OP_ELSE as u8);
    let is_endif = matches!(elems[10], Elem::Op(op) if op == Opcode::OP_ENDIF as u8);
    if !(is_if && is_else && is_endif) {
        return Ok(None);
    }

    let stake_hash = extract_p2pkh_hash(&elems[1..5])?;
    let spend_hash = extract_p2pkh_hash(&elems[6..10])?;

    match (stake_hash, spend_hash) {
        (Some(stake), Some(spend)) => Ok(Some(SolveResult {
            kind: ScriptKind::OfflineStaking,
            destination: Destination::OfflineStake {
                stake_key_hash: stake,
                spend_key_hash: spend,
            },
            solutions: vec![stake.to_vec(), spend.to_vec()],
        })),
        _ => Ok(None),
    }
}

/// Matches `OP_DUP OP_HASH160 <20 bytes> OP_EQUALVERIFY` within a branch.
fn extract_p2pkh_hash(branch: &[Elem]) -> ScriptResult<Option<Hash160>> {
    if branch.len() != 4 {
        return Ok(None);
    }
    let dup = matches!(branch[0], Elem::Op(op) if op == Opcode::OP_DUP as u8);
    let hash160 = matches!(branch[1], Elem::Op(op) if op == Opcode::OP_HASH160 as u8);
    let equalverify = matches!(branch[3], Elem::Op(op) if op == Opcode::OP_EQUALVERIFY as u8);
    if !(dup && hash160 && equalverify) {
        return Ok(None);
    }
    match &branch[2] {
        Elem::Push(data) if data.len() == 20 => {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(data);
            Ok(Some(hash))
        }
        _ => Ok(None),
    }
}

fn try_standard_templates(script: &Script) -> ScriptResult<SolveResult> {
    let elems = script.elements()?;

    // CLTV: <locktime> OP_CHECKLOCKTIMEVERIFY OP_DROP OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG
    if elems.len() == 8 {
        if let (Elem::Push(locktime_bytes), Elem::Op(cltv), Elem::Op(drop)) =
            (&elems[0], &elems[1], &elems[2])
        {
            if *cltv == Opcode::OP_CHECKLOCKTIMEVERIFY as u8 && *drop == Opcode::OP_DROP as u8 {
                if let Some(hash) = extract_p2pkh_hash(&elems[3..7])? {
                    if matches!(elems[7], Elem::Op(op) if op == Opcode::OP_CHECKSIG as u8) {
                        let locktime = le_bytes_to_u32(locktime_bytes);
                        return Ok(SolveResult {
                            kind: ScriptKind::Cltv,
                            destination: Destination::Cltv(locktime, hash),
                            solutions: vec![locktime_bytes.clone(), hash.to_vec()],
                        });
                    }
                }
            }
        }
    }

    // P2PKH: OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG
    if elems.len() == 5 {
        if let Some(hash) = extract_p2pkh_hash(&elems[0..4])? {
            if matches!(elems[4], Elem::Op(op) if op == Opcode::OP_CHECKSIG as u8) {
                return Ok(SolveResult {
                    kind: ScriptKind::PubkeyHash,
                    destination: Destination::P2PKH(hash),
                    solutions: vec![hash.to_vec()],
                });
            }
        }
    }

    // P2PK: <pubkey> OP_CHECKSIG
    if elems.len() == 2 {
        if let (Elem::Push(pubkey), Elem::Op(checksig)) = (&elems[0], &elems[1]) {
            if *checksig == Opcode::OP_CHECKSIG as u8 && (pubkey.len() == 33 || pubkey.len() == 65)
            {
                return Ok(SolveResult {
                    kind: ScriptKind::Pubkey,
                    destination: Destination::P2PK(pubkey.clone()),
                    solutions: vec![pubkey.clone()],
                });
            }
        }
    }

    // MULTISIG: OP_m <pubkey>... OP_n OP_CHECKMULTISIG
    if elems.len() >= 4 {
        if let (Elem::Op(m), Elem::Op(n), Elem::Op(checkmultisig)) = (
            &elems[0],
            &elems[elems.len() - 2],
            &elems[elems.len() - 1],
        ) {
            let is_small_num = |op: u8| (Opcode::OP_1 as u8..=Opcode::OP_16 as u8).contains(&op);
            if is_small_num(*m)
                && is_small_num(*n)
                && *checkmultisig == Opcode::OP_CHECKMULTISIG as u8
            {
                let pubkeys: Option<Vec<Vec<u8>>> = elems[1..elems.len() - 2]
                    .iter()
                    .map(|e| match e {
                        Elem::Push(data) => Some(data.clone()),
                        _ => None,
                    })
                    .collect();
                if let Some(pubkeys) = pubkeys {
                    return Ok(SolveResult {
                        kind: ScriptKind::Multisig,
                        destination: Destination::Null,
                        solutions: pubkeys,
                    });
                }
            }
        }
    }

    // NULL_DATA: OP_RETURN ...
    if matches!(elems.first(), Some(Elem::Op(op)) if *op == Opcode::OP_RETURN as u8) {
        return Ok(SolveResult {
            kind: ScriptKind::NullData,
            destination: Destination::Null,
            solutions: vec![],
        });
    }

    Ok(SolveResult {
        kind: ScriptKind::Nonstandard,
        destination: Destination::Null,
        solutions: vec![],
    })
}

fn solve_token(script: &Script) -> ScriptResult<SolveResult> {
    let base = script.base();
    let base_solved = if base.is_empty() {
        SolveResult {
            kind: ScriptKind::Nonstandard,
            destination: Destination::Null,
            solutions: vec![],
        }
    } else {
        try_standard_templates(&base)?
    };

    let payload = script
        .token_payload()
        .ok_or_else(|| Box::new(ErrorKind::InvalidTokenMarker))?;
    let op_tag = *payload.first().ok_or_else(|| Box::new(ErrorKind::InvalidTokenMarker))?;

    let kind = match op_tag {
        0 | 1 => ScriptKind::NewToken, // 0 = root/sub/unique/username issue, 1 = owner mint
        2 => ScriptKind::TransferToken,
        3 => ScriptKind::ReissueToken,
        _ => return Err(Box::new(ErrorKind::InvalidTokenMarker)),
    };

    Ok(SolveResult {
        kind,
        destination: base_solved.destination,
        solutions: vec![payload.to_vec()],
    })
}

fn le_bytes_to_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    let n = bytes.len().min(4);
    buf[..n].copy_from_slice(&bytes[..n]);
    u32::from_le_bytes(buf)
}

pub fn make_p2pkh(hash: Hash160) -> Script {
    let mut script = Script::new();
    script
        .push_op(Opcode::OP_DUP)
        .push_op(Opcode::OP_HASH160)
        .push_data(&hash)
        .push_op(Opcode::OP_EQUALVERIFY)
        .push_op(Opcode::OP_CHECKSIG);
    script
}

pub fn make_p2sh(hash: Hash160) -> Script {
    let mut script = Script::new();
    script
        .push_op(Opcode::OP_HASH160)
        .push_data(&hash)
        .push_op(Opcode::OP_EQUAL);
    script
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solves_p2pkh() {
        let hash = [7u8; 20];
        let script = make_p2pkh(hash);
        let result = solve(&script).unwrap();
        assert_eq!(result.kind, ScriptKind::PubkeyHash);
        assert_eq!(result.destination, Destination::P2PKH(hash));
    }

    #[test]
    fn solves_p2sh_before_anything_else() {
        let hash = [3u8; 20];
        let script = make_p2sh(hash);
        let result = solve(&script).unwrap();
        assert_eq!(result.kind, ScriptKind::ScriptHash);
        assert_eq!(result.destination, Destination::P2SH(hash));
    }

    #[test]
    fn solves_v0_keyhash_witness_program() {
        let mut script = Script::new();
        script.push_op(Opcode::OP_0).push_data(&[9u8; 20]);
        let result = solve(&script).unwrap();
        assert_eq!(result.kind, ScriptKind::V0KeyHash);
    }

    #[test]
    fn solves_offline_staking_two_branch_form() {
        let mut script = Script::new();
        script.push_op(Opcode::OP_IF);
        let stake_hash = [1u8; 20];
        script
            .push_op(Opcode::OP_DUP)
            .push_op(Opcode::OP_HASH160)
            .push_data(&stake_hash)
            .push_op(Opcode::OP_EQUALVERIFY);
        script.push_op(Opcode::OP_ELSE);
        let spend_hash = [2u8; 20];
        script
            .push_op(Opcode::OP_DUP)
            .push_op(Opcode::OP_HASH160)
            .push_data(&spend_hash)
            .push_op(Opcode::OP_EQUALVERIFY);
        script.push_op(Opcode::OP_ENDIF);

        let result = solve(&script).unwrap();
        assert_eq!(result.kind, ScriptKind::OfflineStaking);
        assert_eq!(
            result.destination,
            Destination::OfflineStake {
                stake_key_hash: stake_hash,
                spend_key_hash: spend_hash
            }
        );
    }

    #[test]
    fn recognizes_token_marker_after_base_script() {
        let hash = [5u8; 20];
        let mut script = make_p2pkh(hash);
        script.push_op(Opcode::OP_TOKEN);
        script.0.push(0); // new-token tag
        script.0.extend_from_slice(b"payload");

        let result = solve(&script).unwrap();
        assert_eq!(result.kind, ScriptKind::NewToken);
        assert_eq!(result.destination, Destination::P2PKH(hash));
    }

    #[test]
    fn a_pushed_hash_containing_the_token_marker_byte_is_not_mistaken_for_one() {
        // 0xc0 (OP_TOKEN) appears inside the pushed 20-byte hash, not as an
        // opcode — this must still solve as a plain, non-token P2PKH.
        let hash = [0xc0u8; 20];
        let script = make_p2pkh(hash);
        assert!(!script.is_token_script());
        let result = solve(&script).unwrap();
        assert_eq!(result.kind, ScriptKind::PubkeyHash);
        assert_eq!(result.destination, Destination::P2PKH(hash));
    }
}
