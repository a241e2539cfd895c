use std::convert::TryInto;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine as _;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

/// Size of an ed25519 public key
pub const NODE_KEY_SIZE: usize = 32;

/// Errors produced while parsing operator or configuration input
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    KeyLength { expected: usize, actual: usize },
    #[error("invalid encoding: {0}")]
    Encoding(String),
    #[error("invalid amount: {0}")]
    Amount(String),
    #[error("invalid address: {0}")]
    Address(String),
}

/// The public key of a payment node
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeKey([u8; NODE_KEY_SIZE]);

impl NodeKey {
    pub fn new(bytes: [u8; NODE_KEY_SIZE]) -> Self {
        NodeKey(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, ParseError> {
        let key: [u8; NODE_KEY_SIZE] = bytes.try_into().map_err(|_| ParseError::KeyLength {
            expected: NODE_KEY_SIZE,
            actual: bytes.len(),
        })?;
        Ok(NodeKey(key))
    }

    pub fn from_hex(s: &str) -> Result<Self, ParseError> {
        let bytes = hex::decode(s.trim()).map_err(|e| ParseError::Encoding(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    pub fn from_base64(s: &str) -> Result<Self, ParseError> {
        let bytes = STANDARD.decode(s.trim()).map_err(|e| ParseError::Encoding(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; NODE_KEY_SIZE] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }
}

impl Display for NodeKey {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl fmt::Debug for NodeKey {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "NodeKey({})", hex::encode(self.0))
    }
}

impl Serialize for NodeKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for NodeKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        NodeKey::from_hex(&s).map_err(de::Error::custom)
    }
}

/// The on-chain address of a payment channel contract
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelAddress(String);

impl ChannelAddress {
    pub fn new<S: Into<String>>(address: S) -> Self {
        ChannelAddress(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ChannelAddress {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelAddress {
    fn from(s: &str) -> Self {
        ChannelAddress(s.to_string())
    }
}

/// An amount in nano-units; one coin is 10^9 nano-units.
///
/// The chain encodes coins as a 120-bit varuint, so `u128` holds every representable value.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Coins(u128);

impl Coins {
    pub const ZERO: Coins = Coins(0);
    pub const DECIMALS: u32 = 9;
    const NANO_PER_COIN: u128 = 1_000_000_000;
    const MAX_NANO: u128 = (1 << 120) - 1;

    pub const fn from_nano(nano: u128) -> Self {
        Coins(nano)
    }

    pub const fn nano(&self) -> u128 {
        self.0
    }

    pub fn checked_add(self, other: Coins) -> Option<Coins> {
        self.0.checked_add(other.0).filter(|v| *v <= Self::MAX_NANO).map(Coins)
    }

    pub fn saturating_sub(self, other: Coins) -> Coins {
        Coins(self.0.saturating_sub(other.0))
    }
}

impl FromStr for Coins {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let bad = || ParseError::Amount(s.to_string());
        let (int_part, frac_part) = match s.split_once('.') {
            Some((i, f)) => (i, f),
            None => (s, ""),
        };
        if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad());
        }
        if frac_part.len() > Self::DECIMALS as usize
            || !frac_part.bytes().all(|b| b.is_ascii_digit())
            || (s.contains('.') && frac_part.is_empty())
        {
            return Err(bad());
        }
        let int: u128 = int_part.parse().map_err(|_| bad())?;
        let mut frac: u128 =
            if frac_part.is_empty() { 0 } else { frac_part.parse().map_err(|_| bad())? };
        for _ in frac_part.len()..Self::DECIMALS as usize {
            frac *= 10;
        }
        let nano = int
            .checked_mul(Self::NANO_PER_COIN)
            .and_then(|v| v.checked_add(frac))
            .filter(|v| *v <= Self::MAX_NANO)
            .ok_or_else(bad)?;
        Ok(Coins(nano))
    }
}

impl Display for Coins {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let int = self.0 / Self::NANO_PER_COIN;
        let frac = self.0 % Self::NANO_PER_COIN;
        if frac == 0 {
            write!(f, "{}", int)
        } else {
            let frac = format!("{:09}", frac);
            write!(f, "{}.{}", int, frac.trim_end_matches('0'))
        }
    }
}

/// Lifecycle state of a payment channel as recorded by the payment service
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Inactive,
    Active,
    Closing,
}

impl Display for ChannelStatus {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            ChannelStatus::Inactive => write!(f, "inactive"),
            ChannelStatus::Active => write!(f, "active"),
            ChannelStatus::Closing => write!(f, "closing"),
        }
    }
}

/// A bilateral on-chain payment channel.
///
/// This is also the persisted record format, so fields added after the first release carry
/// serde defaults.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub address: ChannelAddress,
    /// their node key
    pub counterparty: NodeKey,
    /// their on-chain deposit
    pub deposited: Coins,
    pub status: ChannelStatus,
    #[serde(default)]
    pub our_ready: bool,
    #[serde(default)]
    pub their_ready: bool,
    /// seconds since the epoch
    #[serde(default)]
    pub created_at: u64,
}

impl Channel {
    /// Both parties completed the initial state exchange
    pub fn is_ready(&self) -> bool {
        self.our_ready && self.their_ready
    }
}

/// A reference to a masterchain block
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockId {
    pub workchain: i32,
    pub shard: i64,
    pub seqno: u32,
}

/// Hash of a committed wallet transaction
#[derive(Clone, PartialEq, Eq)]
pub struct TxHash(pub Vec<u8>);

impl Display for TxHash {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(&URL_SAFE.encode(&self.0))
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "TxHash({})", hex::encode(&self.0))
    }
}

const USER_FRIENDLY_LEN: usize = 36;
const FLAG_BOUNCEABLE: u8 = 0x11;
const FLAG_NON_BOUNCEABLE: u8 = 0x51;
const FLAG_TESTNET: u8 = 0x80;

/// Destination of a wallet transfer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WalletAddress {
    pub workchain: i8,
    pub hash: [u8; 32],
    pub bounceable: bool,
    pub testnet: bool,
}

impl WalletAddress {
    pub fn new(workchain: i8, hash: [u8; 32]) -> Self {
        WalletAddress { workchain, hash, bounceable: true, testnet: false }
    }

    fn parse_raw(s: &str) -> Result<Self, ParseError> {
        let bad = |msg: &str| ParseError::Address(format!("{}: {}", msg, s));
        let (wc, hash_hex) = s.split_once(':').ok_or_else(|| bad("missing workchain"))?;
        let workchain: i8 = wc.parse().map_err(|_| bad("bad workchain"))?;
        let hash: [u8; 32] = hex::decode(hash_hex)
            .map_err(|_| bad("bad hash encoding"))?
            .try_into()
            .map_err(|_| bad("bad hash length"))?;
        Ok(WalletAddress { workchain, hash, bounceable: false, testnet: false })
    }

    fn parse_user_friendly(s: &str) -> Result<Self, ParseError> {
        let bad = |msg: &str| ParseError::Address(format!("{}: {}", msg, s));
        let data = if s.contains('-') || s.contains('_') {
            URL_SAFE.decode(s)
        } else {
            STANDARD.decode(s)
        }
        .map_err(|_| bad("bad base64"))?;
        if data.len() != USER_FRIENDLY_LEN {
            return Err(bad("bad length"));
        }
        let expected = u16::from_be_bytes([data[34], data[35]]);
        if crc16(&data[..34]) != expected {
            return Err(bad("bad checksum"));
        }
        let testnet = data[0] & FLAG_TESTNET != 0;
        let bounceable = match data[0] & !FLAG_TESTNET {
            FLAG_BOUNCEABLE => true,
            FLAG_NON_BOUNCEABLE => false,
            _ => return Err(bad("unknown flags")),
        };
        let workchain = data[1] as i8;
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&data[2..34]);
        Ok(WalletAddress { workchain, hash, bounceable, testnet })
    }

    /// The 48-character url-safe form
    pub fn to_user_friendly(&self) -> String {
        let mut data = Vec::with_capacity(USER_FRIENDLY_LEN);
        let mut flags = if self.bounceable { FLAG_BOUNCEABLE } else { FLAG_NON_BOUNCEABLE };
        if self.testnet {
            flags |= FLAG_TESTNET;
        }
        data.push(flags);
        data.push(self.workchain as u8);
        data.extend_from_slice(&self.hash);
        let crc = crc16(&data);
        data.extend_from_slice(&crc.to_be_bytes());
        URL_SAFE.encode(data)
    }
}

impl FromStr for WalletAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.contains(':') {
            Self::parse_raw(s)
        } else {
            Self::parse_user_friendly(s)
        }
    }
}

impl Display for WalletAddress {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(&self.to_user_friendly())
    }
}

// CRC-16/XMODEM
fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for byte in data {
        crc ^= (*byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 { (crc << 1) ^ 0x1021 } else { crc << 1 };
        }
    }
    crc
}
