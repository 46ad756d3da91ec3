//! Rust representations of the channel data types with a fixed amount of
//! Participants and Assets.
//!
//! These types are `Copy` and live on the stack, which keeps the session
//! actor's commit step a plain assignment.

use super::Asset;
use crate::{
    hashing,
    messages::ConversionError,
    perunwire,
    types::{Address, Hash, U256},
};

/// Parameters for this channel, exchanged during channel proposal and sent
/// on-chain during a dispute.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Params<const P: usize> {
    pub challenge_duration: u64,
    pub nonce: U256,
    pub participants: [Address; P],
    pub ledger_channel: bool,
}

impl<const P: usize> Params<P> {
    pub fn channel_id(&self) -> Hash {
        hashing::to_hash(&perunwire::Params::from(*self))
    }
}

impl<const P: usize> TryFrom<perunwire::Params> for Params<P> {
    type Error = ConversionError;

    fn try_from(value: perunwire::Params) -> Result<Self, Self::Error> {
        if value.parts.len() != P {
            return Err(ConversionError::ParticipantSizeMismatch);
        }
        let mut participants = [Address::default(); P];
        for (a, b) in participants.iter_mut().zip(value.parts) {
            *a = b
                .as_slice()
                .try_into()
                .or(Err(ConversionError::ByteLengthMismatch))?;
        }

        Ok(Self {
            challenge_duration: value.challenge_duration,
            nonce: u256_from_bytes(&value.nonce)?,
            participants,
            ledger_channel: value.ledger_channel,
        })
    }
}

impl<const P: usize> From<Params<P>> for perunwire::Params {
    fn from(value: Params<P>) -> Self {
        Self {
            challenge_duration: value.challenge_duration,
            nonce: value.nonce.to_be_bytes().to_vec(),
            parts: value.participants.map(|a| a.0.to_vec()).to_vec(),
            ledger_channel: value.ledger_channel,
        }
    }
}

/// Stores the complete state of a channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct State<const A: usize, const P: usize> {
    id: Hash,
    version: u64,
    pub outcome: Allocation<A, P>,
    pub is_final: bool,
}

impl<const A: usize, const P: usize> State<A, P> {
    pub fn new(params: &Params<P>, init_bals: Allocation<A, P>) -> Self {
        State {
            id: params.channel_id(),
            version: 0,
            outcome: init_bals,
            is_final: false,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn channel_id(&self) -> Hash {
        self.id
    }

    /// Hash that both participants sign.
    pub fn hash(&self) -> Hash {
        hashing::to_hash(&perunwire::State::from(*self))
    }

    /// Create a new state that will replace this state.
    ///
    /// Having id and version as private fields forces the caller to not
    /// accidentally write garbage to one of those fields, so a mutator can
    /// only change the outcome and the final flag.
    pub fn make_next_state(&self) -> Self {
        State {
            id: self.id,
            version: self.version + 1,
            outcome: self.outcome,
            is_final: self.is_final,
        }
    }
}

impl<const A: usize, const P: usize> TryFrom<perunwire::State> for State<A, P> {
    type Error = ConversionError;

    fn try_from(value: perunwire::State) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value
                .id
                .as_slice()
                .try_into()
                .or(Err(ConversionError::ByteLengthMismatch))?,
            version: value.version,
            outcome: value
                .allocation
                .ok_or(ConversionError::ExpectedSome)?
                .try_into()?,
            is_final: value.is_final,
        })
    }
}

impl<const A: usize, const P: usize> From<State<A, P>> for perunwire::State {
    fn from(value: State<A, P>) -> Self {
        Self {
            id: value.id.0.to_vec(),
            version: value.version,
            allocation: Some(value.outcome.into()),
            is_final: value.is_final,
        }
    }
}

/// Separate type for storing just the allocated balance, not the assets.
///
/// This type is used in the channel proposals to specify the funding agreement.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Balances<const A: usize, const P: usize>(pub [ParticipantBalances<P>; A]);

impl<const A: usize, const P: usize> Default for Balances<A, P> {
    fn default() -> Self {
        Self([ParticipantBalances::default(); A])
    }
}

impl<const A: usize, const P: usize> TryFrom<perunwire::Balances> for Balances<A, P> {
    type Error = ConversionError;

    fn try_from(value: perunwire::Balances) -> Result<Self, Self::Error> {
        if value.balances.len() != A {
            Err(ConversionError::AssetSizeMismatch)
        } else {
            let mut balances = Self::default();
            for (a, b) in balances.0.iter_mut().zip(value.balances) {
                *a = b.try_into()?;
            }

            Ok(balances)
        }
    }
}

impl<const A: usize, const P: usize> From<Balances<A, P>> for perunwire::Balances {
    fn from(value: Balances<A, P>) -> Self {
        perunwire::Balances {
            balances: value.0.map(|x| x.into()).to_vec(),
        }
    }
}

/// Stores which participant has how much of each asset.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Allocation<const A: usize, const P: usize> {
    pub assets: [Asset; A],
    pub balances: Balances<A, P>,
}

impl<const A: usize, const P: usize> Allocation<A, P> {
    pub fn new(assets: [Asset; A], balances: Balances<A, P>) -> Self {
        Self { assets, balances }
    }

    pub fn balance(&self, asset: usize, part: usize) -> U256 {
        self.balances.0[asset].0[part]
    }

    /// Sum of all participants' balances per asset, `None` on overflow.
    pub fn total_assets(&self) -> Option<[U256; A]> {
        let mut totals = [U256::zero(); A];
        for (total, bals) in totals.iter_mut().zip(self.balances.0.iter()) {
            for b in bals.0 {
                *total = total.checked_add(b)?;
            }
        }
        Some(totals)
    }

    /// Move `amount` of `asset` from participant `from` to `to`.
    ///
    /// Leaves the allocation untouched if `from` cannot cover the amount.
    pub fn transfer(
        &mut self,
        asset: usize,
        from: usize,
        to: usize,
        amount: U256,
    ) -> Result<(), InsufficientFunds> {
        let bals = &mut self.balances.0[asset].0;
        if bals[from] < amount {
            return Err(InsufficientFunds {
                available: bals[from],
                requested: amount,
            });
        }
        bals[from] -= amount;
        bals[to] += amount;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("insufficient funds: requested {requested}, available {available}")]
pub struct InsufficientFunds {
    pub available: U256,
    pub requested: U256,
}

impl<const A: usize, const P: usize> TryFrom<perunwire::Allocation> for Allocation<A, P> {
    type Error = ConversionError;

    fn try_from(value: perunwire::Allocation) -> Result<Self, Self::Error> {
        if value.assets.len() != A {
            return Err(ConversionError::AssetSizeMismatch);
        }
        let mut assets = [Asset::default(); A];
        for (a, b) in assets.iter_mut().zip(value.assets) {
            *a = Asset {
                chain_id: u256_from_bytes(&b.chain_id)?,
                holder: b
                    .holder
                    .as_slice()
                    .try_into()
                    .or(Err(ConversionError::ByteLengthMismatch))?,
            };
        }

        Ok(Self {
            assets,
            balances: value
                .balances
                .ok_or(ConversionError::ExpectedSome)?
                .try_into()?,
        })
    }
}

impl<const A: usize, const P: usize> From<Allocation<A, P>> for perunwire::Allocation {
    fn from(value: Allocation<A, P>) -> Self {
        perunwire::Allocation {
            assets: value
                .assets
                .map(|a| perunwire::Asset {
                    chain_id: a.chain_id.to_be_bytes().to_vec(),
                    holder: a.holder.0.to_vec(),
                })
                .to_vec(),
            balances: Some(value.balances.into()),
        }
    }
}

/// Balances of all participants for a single asset.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ParticipantBalances<const P: usize>(pub [U256; P]);

impl<const P: usize> Default for ParticipantBalances<P> {
    fn default() -> Self {
        Self([U256::default(); P])
    }
}

impl<const P: usize> TryFrom<perunwire::Balance> for ParticipantBalances<P> {
    type Error = ConversionError;

    fn try_from(value: perunwire::Balance) -> Result<Self, Self::Error> {
        if value.balance.len() != P {
            Err(ConversionError::ParticipantSizeMismatch)
        } else {
            let mut balances = Self::default();
            for (a, b) in balances.0.iter_mut().zip(value.balance) {
                *a = u256_from_bytes(&b)?;
            }
            Ok(balances)
        }
    }
}

impl<const P: usize> From<ParticipantBalances<P>> for perunwire::Balance {
    fn from(value: ParticipantBalances<P>) -> Self {
        perunwire::Balance {
            balance: value.0.map(|v| v.to_be_bytes().to_vec()).to_vec(),
        }
    }
}

/// Big-endian bytes to [U256]. go-perun strips leading zeroes, so anything up
/// to 32 bytes is accepted.
fn u256_from_bytes(b: &[u8]) -> Result<U256, ConversionError> {
    if b.len() > 32 {
        return Err(ConversionError::ByteLengthMismatch);
    }
    Ok(U256::from_big_endian(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(nonce: u64) -> Params<2> {
        Params {
            challenge_duration: 10,
            nonce: nonce.into(),
            participants: [Address([1; 20]), Address([2; 20])],
            ledger_channel: true,
        }
    }

    fn alloc(a: u64, b: u64) -> Allocation<1, 2> {
        Allocation::new(
            [Asset {
                chain_id: 1337.into(),
                holder: Address([9; 20]),
            }],
            Balances([ParticipantBalances([a.into(), b.into()])]),
        )
    }

    #[test]
    fn channel_id_depends_on_nonce_and_participants() {
        assert_eq!(params(1).channel_id(), params(1).channel_id());
        assert_ne!(params(1).channel_id(), params(2).channel_id());

        let mut swapped = params(1);
        swapped.participants.swap(0, 1);
        assert_ne!(params(1).channel_id(), swapped.channel_id());
    }

    #[test]
    fn next_state_keeps_id_and_increments_version() {
        let s = State::new(&params(1), alloc(10, 10));
        assert_eq!(s.version(), 0);
        assert_eq!(s.channel_id(), params(1).channel_id());

        let n = s.make_next_state();
        assert_eq!(n.version(), 1);
        assert_eq!(n.channel_id(), s.channel_id());
        assert_ne!(n.hash(), s.hash());
    }

    #[test]
    fn transfer_conserves_totals() {
        let mut a = alloc(10, 10);
        let before = a.total_assets().unwrap();
        a.transfer(0, 1, 0, 5.into()).unwrap();
        assert_eq!(a.balance(0, 0), 15.into());
        assert_eq!(a.balance(0, 1), 5.into());
        assert_eq!(a.total_assets().unwrap(), before);
    }

    #[test]
    fn transfer_rejects_overdraft() {
        let mut a = alloc(10, 3);
        let err = a.transfer(0, 1, 0, 5.into()).unwrap_err();
        assert_eq!(err.available, 3.into());
        assert_eq!(a, alloc(10, 3));
    }

    #[test]
    fn total_assets_detects_overflow() {
        let mut a = alloc(0, 0);
        a.balances.0[0].0 = [U256::MAX, 1.into()];
        assert_eq!(a.total_assets(), None);
    }

    #[test]
    fn state_survives_wire_conversion() {
        let mut s = State::new(&params(3), alloc(7, 13)).make_next_state();
        s.is_final = true;
        let wire: perunwire::State = s.into();
        let back: State<1, 2> = wire.try_into().unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn wire_state_with_wrong_participant_count_is_rejected() {
        let s = State::new(&params(3), alloc(7, 13));
        let mut wire: perunwire::State = s.into();
        wire.allocation.as_mut().unwrap().balances.as_mut().unwrap().balances[0]
            .balance
            .push(vec![1]);
        assert!(matches!(
            State::<1, 2>::try_from(wire),
            Err(ConversionError::ParticipantSizeMismatch)
        ));
    }

    #[test]
    fn wire_state_without_allocation_is_rejected() {
        let s = State::new(&params(3), alloc(7, 13));
        let mut wire: perunwire::State = s.into();
        wire.allocation = None;
        assert!(matches!(
            State::<1, 2>::try_from(wire),
            Err(ConversionError::ExpectedSome)
        ));
    }
}
