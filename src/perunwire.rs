//! Protobuf messages exchanged between participants.
//!
//! The layout follows go-perun's `wire.proto` for the messages a two-party
//! ledger channel needs. Numbers and hashes are big-endian byte strings,
//! addresses are 20 raw bytes.

/// Channel parameters; the ChannelID is the hash of their encoding.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Params {
    #[prost(uint64, tag = "1")]
    pub challenge_duration: u64,
    #[prost(bytes = "vec", tag = "2")]
    pub nonce: Vec<u8>,
    #[prost(bytes = "vec", repeated, tag = "3")]
    pub parts: Vec<Vec<u8>>,
    #[prost(bool, tag = "4")]
    pub ledger_channel: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Asset {
    #[prost(bytes = "vec", tag = "1")]
    pub chain_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub holder: Vec<u8>,
}

/// Balances of all participants for one asset.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Balance {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub balance: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Balances {
    #[prost(message, repeated, tag = "1")]
    pub balances: Vec<Balance>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Allocation {
    #[prost(message, repeated, tag = "1")]
    pub assets: Vec<Asset>,
    #[prost(message, optional, tag = "2")]
    pub balances: Option<Balances>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct State {
    #[prost(bytes = "vec", tag = "1")]
    pub id: Vec<u8>,
    #[prost(uint64, tag = "2")]
    pub version: u64,
    #[prost(message, optional, tag = "3")]
    pub allocation: Option<Allocation>,
    #[prost(bool, tag = "4")]
    pub is_final: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BaseChannelProposal {
    #[prost(bytes = "vec", tag = "1")]
    pub proposal_id: Vec<u8>,
    #[prost(uint64, tag = "2")]
    pub challenge_duration: u64,
    #[prost(bytes = "vec", tag = "3")]
    pub nonce_share: Vec<u8>,
    #[prost(message, optional, tag = "4")]
    pub init_bals: Option<Allocation>,
    #[prost(message, optional, tag = "5")]
    pub funding_agreement: Option<Balances>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LedgerChannelProposalMsg {
    #[prost(message, optional, tag = "1")]
    pub base_channel_proposal: Option<BaseChannelProposal>,
    #[prost(bytes = "vec", tag = "2")]
    pub participant: Vec<u8>,
    #[prost(bytes = "vec", repeated, tag = "3")]
    pub peers: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LedgerChannelProposalAccMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub proposal_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub nonce_share: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub participant: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChannelProposalRejMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub proposal_id: Vec<u8>,
    #[prost(string, tag = "2")]
    pub reason: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChannelUpdate {
    #[prost(message, optional, tag = "1")]
    pub state: Option<State>,
    #[prost(uint32, tag = "2")]
    pub actor_idx: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChannelUpdateMsg {
    #[prost(message, optional, tag = "1")]
    pub channel_update: Option<ChannelUpdate>,
    #[prost(bytes = "vec", tag = "2")]
    pub sig: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChannelUpdateAccMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub channel_id: Vec<u8>,
    #[prost(uint64, tag = "2")]
    pub version: u64,
    #[prost(bytes = "vec", tag = "3")]
    pub sig: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChannelUpdateRejMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub channel_id: Vec<u8>,
    #[prost(uint64, tag = "2")]
    pub version: u64,
    #[prost(string, tag = "3")]
    pub reason: String,
}

/// Outer frame of every participant message.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Envelope {
    #[prost(bytes = "vec", tag = "1")]
    pub sender: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub recipient: Vec<u8>,
    #[prost(oneof = "envelope::Msg", tags = "3, 4, 5, 6, 7, 8")]
    pub msg: Option<envelope::Msg>,
}

pub mod envelope {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Msg {
        #[prost(message, tag = "3")]
        LedgerChannelProposalMsg(super::LedgerChannelProposalMsg),
        #[prost(message, tag = "4")]
        LedgerChannelProposalAccMsg(super::LedgerChannelProposalAccMsg),
        #[prost(message, tag = "5")]
        ChannelProposalRejMsg(super::ChannelProposalRejMsg),
        #[prost(message, tag = "6")]
        ChannelUpdateMsg(super::ChannelUpdateMsg),
        #[prost(message, tag = "7")]
        ChannelUpdateAccMsg(super::ChannelUpdateAccMsg),
        #[prost(message, tag = "8")]
        ChannelUpdateRejMsg(super::ChannelUpdateRejMsg),
    }
}
