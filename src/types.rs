//! Fixed-size byte types, addresses and the `U256` balance type shared by all
//! layers (channel state, wire messages, ledger).

use core::{fmt, str::FromStr};

use rand::{distributions::Standard, prelude::Distribution};
use serde::{de, Deserialize, Deserializer};
use uint::construct_uint;

macro_rules! impl_hex_fmt {
    ($T:ident) => {
        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("0x")?;
                for b in self.0 {
                    f.write_fmt(format_args!("{:02x}", b))?;
                }
                Ok(())
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(self, f)
            }
        }
    };
}

macro_rules! bytesN {
    ( $T:ident, $N:literal ) => {
        #[derive(PartialEq, Eq, Hash, Copy, Clone)]
        pub struct $T(pub [u8; $N]);

        impl Distribution<$T> for Standard {
            fn sample<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> $T {
                let mut buf = [0u8; $N];
                rng.fill(&mut buf[..]);
                $T(buf)
            }
        }

        impl Default for $T {
            fn default() -> Self {
                Self([0; $N])
            }
        }

        impl TryFrom<&[u8]> for $T {
            type Error = core::array::TryFromSliceError;

            fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
                Ok(Self(value.try_into()?))
            }
        }

        impl_hex_fmt!($T);
    };
}

bytesN!(Bytes32, 32);
bytesN!(Hash, 32);
bytesN!(Signature, 65);

impl Signature {
    pub fn new(rs: &[u8; 64], v: u8) -> Self {
        let mut sig: Signature = Signature([0; 65]);
        sig.0[..64].copy_from_slice(rs);
        sig.0[64] = v;
        sig
    }
}

// primitive_types::U256 would work too, but it brings its own serde
// representation and we only ever need big-endian bytes on the wire.
construct_uint! {
    pub struct U256(4);
}

impl U256 {
    /// 32 byte big-endian representation, the format used on the wire.
    pub fn to_be_bytes(&self) -> [u8; 32] {
        let mut buf = [0u8; 32];
        self.to_big_endian(&mut buf);
        buf
    }
}

/// Wei per ether.
pub const WEI_PER_ETH: u64 = 1_000_000_000_000_000_000;

/// Convert whole ether to wei.
pub fn eth_to_wei(eth: u64) -> U256 {
    U256::from(eth) * U256::from(WEI_PER_ETH)
}

/// Format a wei amount as ether, e.g. `1.5 ETH`.
///
/// Trailing zeros of the fraction are dropped.
pub fn format_eth(wei: U256) -> String {
    let (whole, frac) = wei.div_mod(U256::from(WEI_PER_ETH));
    if frac.is_zero() {
        return format!("{whole} ETH");
    }
    let frac = format!("{:018}", frac.low_u64());
    format!("{whole}.{} ETH", frac.trim_end_matches('0'))
}

impl Distribution<U256> for Standard {
    fn sample<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> U256 {
        let buf: [u8; 32] = rng.gen();
        U256::from_big_endian(&buf)
    }
}

/// On-chain (and in this crate also off-chain) identity of a participant.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Address(pub [u8; 20]);
impl_hex_fmt!(Address);

impl Address {
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

impl TryFrom<&[u8]> for Address {
    type Error = core::array::TryFromSliceError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        Ok(Self(value.try_into()?))
    }
}

impl Distribution<Address> for Standard {
    fn sample<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> Address {
        Address(rng.gen())
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ParseAddressError {
    #[error("address is not valid hex: {0}")]
    Hex(#[from] hex::FromHexError),
}

impl FromStr for Address {
    type Err = ParseAddressError;

    /// Parses `0x`-prefixed (or bare) 40 character hex.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let mut addr = Address::default();
        hex::decode_to_slice(s, &mut addr.0)?;
        Ok(addr)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
