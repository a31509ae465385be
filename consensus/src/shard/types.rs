//! Types used in [crate::shard].

use super::{committee::Committee, Error};
use crate::types::{Epoch, Height, Round, ShardId, ValidatorId, View};
use bytes::{Buf, BufMut, Bytes};
use shardline_codec::{
    Encode, EncodeSize, Error as CodecError, FixedSize, RangeCfg, Read, ReadExt, Write,
};
use shardline_cryptography::{
    bls12381::{aggregate_signatures, aggregate_verify, PrivateKey, PublicKey, Signature},
    hash, merkle_root, Digest,
};
use shardline_utils::{union, BitVec};
use std::cmp::Ordering;

/// Suffix for block signatures.
pub const BLOCK_SUFFIX: &[u8] = b"_BLOCK";

/// Suffix for proposal signatures.
pub const PROPOSAL_SUFFIX: &[u8] = b"_PROPOSAL";

/// Suffix for pre-vote signatures.
pub const PREVOTE_SUFFIX: &[u8] = b"_PREVOTE";

/// Suffix for pre-commit signatures.
pub const PRECOMMIT_SUFFIX: &[u8] = b"_PRECOMMIT";

/// Suffix for view change signatures.
pub const VIEW_CHANGE_SUFFIX: &[u8] = b"_VIEWCHANGE";

/// Suffix for crosslink signatures.
pub const CROSSLINK_SUFFIX: &[u8] = b"_CROSSLINK";

/// Namespaces for every signed message type, derived from a base namespace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Namespaces {
    pub block: Vec<u8>,
    pub proposal: Vec<u8>,
    pub prevote: Vec<u8>,
    pub precommit: Vec<u8>,
    pub view_change: Vec<u8>,
    pub crosslink: Vec<u8>,
}

impl Namespaces {
    pub fn new(namespace: &[u8]) -> Self {
        Self {
            block: union(namespace, BLOCK_SUFFIX),
            proposal: union(namespace, PROPOSAL_SUFFIX),
            prevote: union(namespace, PREVOTE_SUFFIX),
            precommit: union(namespace, PRECOMMIT_SUFFIX),
            view_change: union(namespace, VIEW_CHANGE_SUFFIX),
            crosslink: union(namespace, CROSSLINK_SUFFIX),
        }
    }

    /// Returns the namespace for votes of `phase`.
    pub fn vote(&self, phase: Phase) -> &[u8] {
        match phase {
            Phase::PreVote => &self.prevote,
            Phase::PreCommit => &self.precommit,
        }
    }
}

/// Bounds applied when decoding untrusted messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Limits {
    /// Maximum number of transactions in a block.
    pub max_transactions: usize,
    /// Maximum size of a single transaction.
    pub max_transaction_size: usize,
    /// Maximum number of outgoing (and of processed) cross-shard messages in a block.
    pub max_cross_shard_messages: usize,
    /// Maximum size of a cross-shard message payload.
    pub max_cross_shard_payload: usize,
    /// Maximum number of members in a committee (bounds signer bitmaps).
    pub max_committee_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_transactions: 4_096,
            max_transaction_size: 64 * 1024,
            max_cross_shard_messages: 1_024,
            max_cross_shard_payload: 16 * 1024,
            max_committee_size: 1_024,
        }
    }
}

/// Voting phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    PreVote = 0,
    PreCommit = 1,
}

impl Write for Phase {
    fn write(&self, buf: &mut impl BufMut) {
        (*self as u8).write(buf);
    }
}

impl Read for Phase {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        match u8::read(buf)? {
            0 => Ok(Phase::PreVote),
            1 => Ok(Phase::PreCommit),
            tag => Err(CodecError::InvalidEnum("Phase", tag)),
        }
    }
}

impl FixedSize for Phase {
    const SIZE: usize = 1;
}

impl EncodeSize for Phase {
    fn encode_size(&self) -> usize {
        Self::SIZE
    }
}

/// A message emitted by one shard for delivery to another.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CrossShardMessage {
    pub source: ShardId,
    pub destination: ShardId,
    pub nonce: u64,
    pub payload: Bytes,
}

impl CrossShardMessage {
    /// Content identifier used when the destination shard reports the message as processed.
    pub fn id(&self) -> Digest {
        hash(&self.encode())
    }
}

impl Write for CrossShardMessage {
    fn write(&self, buf: &mut impl BufMut) {
        self.source.write(buf);
        self.destination.write(buf);
        self.nonce.write(buf);
        self.payload.write(buf);
    }
}

impl EncodeSize for CrossShardMessage {
    fn encode_size(&self) -> usize {
        self.source.encode_size()
            + self.destination.encode_size()
            + self.nonce.encode_size()
            + self.payload.encode_size()
    }
}

impl Read for CrossShardMessage {
    /// Bounds on the payload size.
    type Cfg = RangeCfg;

    fn read_cfg(buf: &mut impl Buf, payload: &RangeCfg) -> Result<Self, CodecError> {
        let source = ShardId::read(buf)?;
        let destination = ShardId::read(buf)?;
        let nonce = u64::read(buf)?;
        let payload = Bytes::read_cfg(buf, payload)?;
        Ok(Self {
            source,
            destination,
            nonce,
            payload,
        })
    }
}

/// Leaf tags for the transaction root.
const TRANSACTION_LEAF: u8 = 0;
const OUTGOING_LEAF: u8 = 1;
const PROCESSED_LEAF: u8 = 2;

/// Contents of a block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Body {
    pub transactions: Vec<Bytes>,
    /// Cross-shard messages emitted by this block.
    pub outgoing: Vec<CrossShardMessage>,
    /// Ids of cross-shard messages (from other shards) consumed by this block.
    pub processed: Vec<Digest>,
}

impl Body {
    /// Merkle root over every item in the body.
    ///
    /// Each leaf is tagged with its kind so a transaction can never be confused with a
    /// cross-shard message of the same bytes.
    pub fn root(&self) -> Digest {
        let mut leaves: Vec<Vec<u8>> =
            Vec::with_capacity(self.transactions.len() + self.outgoing.len() + self.processed.len());
        for tx in &self.transactions {
            leaves.push([&[TRANSACTION_LEAF][..], tx].concat());
        }
        for msg in &self.outgoing {
            leaves.push([&[OUTGOING_LEAF][..], &msg.encode()].concat());
        }
        for id in &self.processed {
            leaves.push([&[PROCESSED_LEAF][..], id].concat());
        }
        merkle_root(&leaves)
    }
}

impl Write for Body {
    fn write(&self, buf: &mut impl BufMut) {
        self.transactions.write(buf);
        self.outgoing.write(buf);
        self.processed.write(buf);
    }
}

impl EncodeSize for Body {
    fn encode_size(&self) -> usize {
        self.transactions.encode_size() + self.outgoing.encode_size() + self.processed.encode_size()
    }
}

impl Read for Body {
    type Cfg = Limits;

    fn read_cfg(buf: &mut impl Buf, limits: &Limits) -> Result<Self, CodecError> {
        let transactions = Vec::<Bytes>::read_cfg(
            buf,
            &(
                (..=limits.max_transactions).into(),
                (..=limits.max_transaction_size).into(),
            ),
        )?;
        let outgoing = Vec::<CrossShardMessage>::read_cfg(
            buf,
            &(
                (..=limits.max_cross_shard_messages).into(),
                (..=limits.max_cross_shard_payload).into(),
            ),
        )?;
        let processed =
            Vec::<Digest>::read_cfg(buf, &((..=limits.max_cross_shard_messages).into(), ()))?;
        Ok(Self {
            transactions,
            outgoing,
            processed,
        })
    }
}

/// Block header. The block's hash is the hash of its encoded header.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Header {
    pub shard: ShardId,
    pub height: Height,
    /// View in which the block was first proposed.
    pub view: View,
    pub parent: Digest,
    pub proposer: ValidatorId,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub state_root: Digest,
    pub tx_root: Digest,
}

impl Header {
    pub fn digest(&self) -> Digest {
        hash(&self.encode())
    }
}

impl Write for Header {
    fn write(&self, buf: &mut impl BufMut) {
        self.shard.write(buf);
        self.height.write(buf);
        self.view.write(buf);
        self.parent.write(buf);
        self.proposer.write(buf);
        self.timestamp.write(buf);
        self.state_root.write(buf);
        self.tx_root.write(buf);
    }
}

impl Read for Header {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        Ok(Self {
            shard: ShardId::read(buf)?,
            height: Height::read(buf)?,
            view: View::read(buf)?,
            parent: Digest::read(buf)?,
            proposer: ValidatorId::read(buf)?,
            timestamp: u64::read(buf)?,
            state_root: Digest::read(buf)?,
            tx_root: Digest::read(buf)?,
        })
    }
}

impl FixedSize for Header {
    const SIZE: usize = ShardId::SIZE
        + Height::SIZE
        + View::SIZE
        + Digest::SIZE
        + ValidatorId::SIZE
        + u64::SIZE
        + Digest::SIZE
        + Digest::SIZE;
}

impl EncodeSize for Header {
    fn encode_size(&self) -> usize {
        Self::SIZE
    }
}

/// A block signed by its proposer.
///
/// Blocks are immutable once constructed and addressed by [Block::digest].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    header: Header,
    body: Body,
    signature: Signature,

    /// Cached hash of the header.
    digest: Digest,
}

impl Block {
    /// Sign a new block as its proposer.
    pub fn sign(namespaces: &Namespaces, signer: &PrivateKey, header: Header, body: Body) -> Self {
        let digest = header.digest();
        let signature = signer.sign(&namespaces.block, &digest);
        Self {
            header,
            body,
            signature,
            digest,
        }
    }

    /// Assemble a block from parts without checking the signature.
    pub fn from_parts(header: Header, body: Body, signature: Signature) -> Self {
        let digest = header.digest();
        Self {
            header,
            body,
            signature,
            digest,
        }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn digest(&self) -> Digest {
        self.digest
    }

    pub fn height(&self) -> Height {
        self.header.height
    }

    /// Verify the proposer's signature with its public key.
    pub fn verify(&self, namespaces: &Namespaces, public_key: &PublicKey) -> bool {
        public_key.verify(&namespaces.block, &self.digest, &self.signature)
    }
}

impl Write for Block {
    fn write(&self, buf: &mut impl BufMut) {
        self.header.write(buf);
        self.body.write(buf);
        self.signature.write(buf);
    }
}

impl EncodeSize for Block {
    fn encode_size(&self) -> usize {
        self.header.encode_size() + self.body.encode_size() + self.signature.encode_size()
    }
}

impl Read for Block {
    type Cfg = Limits;

    fn read_cfg(buf: &mut impl Buf, limits: &Limits) -> Result<Self, CodecError> {
        let header = Header::read(buf)?;
        let body = Body::read_cfg(buf, limits)?;
        let signature = Signature::read(buf)?;
        Ok(Self::from_parts(header, body, signature))
    }
}

/// Message signed by votes and aggregated into quorum certificates.
fn vote_message(shard: ShardId, round: Round, block: &Digest) -> Vec<u8> {
    let mut message = Vec::with_capacity(ShardId::SIZE + Round::SIZE + Digest::SIZE);
    shard.write(&mut message);
    round.write(&mut message);
    block.write(&mut message);
    message
}

/// A signed vote for a block in some phase of a round.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Vote {
    pub voter: ValidatorId,
    pub round: Round,
    pub phase: Phase,
    pub block: Digest,
    pub signature: Signature,
}

impl Vote {
    /// Sign a vote for `block` in `round`.
    pub fn sign(
        namespaces: &Namespaces,
        signer: &PrivateKey,
        voter: ValidatorId,
        shard: ShardId,
        round: Round,
        phase: Phase,
        block: Digest,
    ) -> Self {
        let signature = signer.sign(namespaces.vote(phase), &vote_message(shard, round, &block));
        Self {
            voter,
            round,
            phase,
            block,
            signature,
        }
    }

    pub fn height(&self) -> Height {
        self.round.height
    }

    pub fn view(&self) -> View {
        self.round.view
    }

    /// Verify the vote was signed by a member of `committee`.
    pub fn verify(&self, namespaces: &Namespaces, committee: &Committee) -> bool {
        let Some(public_key) = committee.public_key(self.voter) else {
            return false;
        };
        public_key.verify(
            namespaces.vote(self.phase),
            &vote_message(committee.shard(), self.round, &self.block),
            &self.signature,
        )
    }
}

impl Write for Vote {
    fn write(&self, buf: &mut impl BufMut) {
        self.voter.write(buf);
        self.round.write(buf);
        self.phase.write(buf);
        self.block.write(buf);
        self.signature.write(buf);
    }
}

impl Read for Vote {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        Ok(Self {
            voter: ValidatorId::read(buf)?,
            round: Round::read(buf)?,
            phase: Phase::read(buf)?,
            block: Digest::read(buf)?,
            signature: Signature::read(buf)?,
        })
    }
}

impl FixedSize for Vote {
    const SIZE: usize =
        ValidatorId::SIZE + Round::SIZE + Phase::SIZE + Digest::SIZE + Signature::SIZE;
}

impl EncodeSize for Vote {
    fn encode_size(&self) -> usize {
        Self::SIZE
    }
}

/// Returns the public keys selected by `signers`, or `None` if the bitmap does not match the
/// committee or selects fewer than a quorum.
fn quorum_keys<'a>(committee: &'a Committee, signers: &BitVec) -> Option<Vec<&'a PublicKey>> {
    if signers.len() != committee.size() as usize {
        return None;
    }
    if (signers.count_ones() as u32) < committee.quorum() {
        return None;
    }
    signers
        .ones()
        .map(|index| committee.member(index as u32).map(|m| &m.public_key))
        .collect()
}

/// Aggregate signatures from committee members into a signature and signer bitmap.
pub(crate) fn aggregate<'a>(
    committee_size: u32,
    signatures: impl IntoIterator<Item = (u32, &'a Signature)>,
) -> Result<(Signature, BitVec), Error> {
    let mut signers = BitVec::zeroes(committee_size as usize);
    let mut collected = Vec::new();
    for (index, signature) in signatures {
        signers.set(index as usize);
        collected.push(signature);
    }
    let signature = aggregate_signatures(collected).map_err(|_| Error::EmptyAggregate)?;
    Ok((signature, signers))
}

/// Aggregated proof that at least a quorum of a committee voted for the same block in the
/// same phase of a round.
///
/// A [Phase::PreCommit] certificate is a finality certificate.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct QuorumCertificate {
    pub block: Digest,
    pub round: Round,
    pub phase: Phase,
    pub signature: Signature,
    pub signers: BitVec,
}

impl QuorumCertificate {
    pub fn height(&self) -> Height {
        self.round.height
    }

    pub fn view(&self) -> View {
        self.round.view
    }

    /// Ordering key: a certificate ranks above another if it is for a later height, a later view
    /// at the same height, or a later phase in the same round.
    pub fn rank(&self) -> (Height, View, Phase) {
        (self.round.height, self.round.view, self.phase)
    }

    /// Returns true if this certificate finalizes its block.
    pub fn is_final(&self) -> bool {
        self.phase == Phase::PreCommit
    }

    /// Verify the certificate against `committee`.
    ///
    /// Valid iff the bitmap selects at least `quorum` distinct members and their aggregate
    /// signature verifies over the vote message.
    pub fn verify(&self, namespaces: &Namespaces, committee: &Committee) -> bool {
        let Some(keys) = quorum_keys(committee, &self.signers) else {
            return false;
        };
        aggregate_verify(
            namespaces.vote(self.phase),
            &vote_message(committee.shard(), self.round, &self.block),
            keys,
            &self.signature,
        )
    }
}

/// Returns the higher-ranked of two optional certificates.
pub fn highest(
    a: Option<QuorumCertificate>,
    b: Option<QuorumCertificate>,
) -> Option<QuorumCertificate> {
    match (a, b) {
        (Some(a), Some(b)) => match a.rank().cmp(&b.rank()) {
            Ordering::Less => Some(b),
            _ => Some(a),
        },
        (a, None) => a,
        (None, b) => b,
    }
}

impl Write for QuorumCertificate {
    fn write(&self, buf: &mut impl BufMut) {
        self.block.write(buf);
        self.round.write(buf);
        self.phase.write(buf);
        self.signature.write(buf);
        self.signers.write(buf);
    }
}

impl EncodeSize for QuorumCertificate {
    fn encode_size(&self) -> usize {
        self.block.encode_size()
            + self.round.encode_size()
            + self.phase.encode_size()
            + self.signature.encode_size()
            + self.signers.encode_size()
    }
}

impl Read for QuorumCertificate {
    /// Maximum committee size.
    type Cfg = usize;

    fn read_cfg(buf: &mut impl Buf, max_committee: &usize) -> Result<Self, CodecError> {
        Ok(Self {
            block: Digest::read(buf)?,
            round: Round::read(buf)?,
            phase: Phase::read(buf)?,
            signature: Signature::read(buf)?,
            signers: BitVec::read_cfg(buf, max_committee)?,
        })
    }
}

/// Message signed by view change requests.
fn view_change_message(shard: ShardId, height: Height, view: View) -> Vec<u8> {
    let mut message = Vec::with_capacity(ShardId::SIZE + Height::SIZE + View::SIZE);
    shard.write(&mut message);
    height.write(&mut message);
    view.write(&mut message);
    message
}

/// A request to abandon the current view at `height` and move to `new_view`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViewChange {
    pub validator: ValidatorId,
    pub height: Height,
    pub new_view: View,
    /// Highest certificate the sender has seen. Not covered by the signature (certificates
    /// authenticate themselves).
    pub last_known_qc: Option<QuorumCertificate>,
    pub signature: Signature,
}

impl ViewChange {
    pub fn sign(
        namespaces: &Namespaces,
        signer: &PrivateKey,
        validator: ValidatorId,
        shard: ShardId,
        height: Height,
        new_view: View,
        last_known_qc: Option<QuorumCertificate>,
    ) -> Self {
        let signature = signer.sign(
            &namespaces.view_change,
            &view_change_message(shard, height, new_view),
        );
        Self {
            validator,
            height,
            new_view,
            last_known_qc,
            signature,
        }
    }

    /// Verify the sender's signature (the carried certificate is verified separately).
    pub fn verify(&self, namespaces: &Namespaces, committee: &Committee) -> bool {
        let Some(public_key) = committee.public_key(self.validator) else {
            return false;
        };
        public_key.verify(
            &namespaces.view_change,
            &view_change_message(committee.shard(), self.height, self.new_view),
            &self.signature,
        )
    }
}

impl Write for ViewChange {
    fn write(&self, buf: &mut impl BufMut) {
        self.validator.write(buf);
        self.height.write(buf);
        self.new_view.write(buf);
        self.last_known_qc.write(buf);
        self.signature.write(buf);
    }
}

impl EncodeSize for ViewChange {
    fn encode_size(&self) -> usize {
        self.validator.encode_size()
            + self.height.encode_size()
            + self.new_view.encode_size()
            + self.last_known_qc.encode_size()
            + self.signature.encode_size()
    }
}

impl Read for ViewChange {
    /// Maximum committee size.
    type Cfg = usize;

    fn read_cfg(buf: &mut impl Buf, max_committee: &usize) -> Result<Self, CodecError> {
        Ok(Self {
            validator: ValidatorId::read(buf)?,
            height: Height::read(buf)?,
            new_view: View::read(buf)?,
            last_known_qc: Option::<QuorumCertificate>::read_cfg(buf, max_committee)?,
            signature: Signature::read(buf)?,
        })
    }
}

/// Proof that a quorum abandoned every view below `view` at `height`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewView {
    pub height: Height,
    pub view: View,
    pub signature: Signature,
    pub signers: BitVec,
    /// Highest certificate carried by the aggregated view change messages.
    pub high_qc: Option<QuorumCertificate>,
}

impl NewView {
    pub fn round(&self) -> Round {
        Round::new(self.height, self.view)
    }

    /// Verify the aggregate signature (the carried certificate is verified separately).
    pub fn verify(&self, namespaces: &Namespaces, committee: &Committee) -> bool {
        let Some(keys) = quorum_keys(committee, &self.signers) else {
            return false;
        };
        aggregate_verify(
            &namespaces.view_change,
            &view_change_message(committee.shard(), self.height, self.view),
            keys,
            &self.signature,
        )
    }
}

impl Write for NewView {
    fn write(&self, buf: &mut impl BufMut) {
        self.height.write(buf);
        self.view.write(buf);
        self.signature.write(buf);
        self.signers.write(buf);
        self.high_qc.write(buf);
    }
}

impl EncodeSize for NewView {
    fn encode_size(&self) -> usize {
        self.height.encode_size()
            + self.view.encode_size()
            + self.signature.encode_size()
            + self.signers.encode_size()
            + self.high_qc.encode_size()
    }
}

impl Read for NewView {
    /// Maximum committee size.
    type Cfg = usize;

    fn read_cfg(buf: &mut impl Buf, max_committee: &usize) -> Result<Self, CodecError> {
        Ok(Self {
            height: Height::read(buf)?,
            view: View::read(buf)?,
            signature: Signature::read(buf)?,
            signers: BitVec::read_cfg(buf, max_committee)?,
            high_qc: Option::<QuorumCertificate>::read_cfg(buf, max_committee)?,
        })
    }
}

/// A block proposed for a round, signed by that round's leader.
///
/// The block may have been built in an earlier view (when re-proposing a certified block).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Proposal {
    pub block: Block,
    pub view: View,
    /// Required for views above zero.
    pub justify: Option<NewView>,
    /// Finality certificate of the parent block (absent when the parent is the starting tip).
    pub parent: Option<QuorumCertificate>,
    pub signature: Signature,
}

impl Proposal {
    pub fn sign(
        namespaces: &Namespaces,
        signer: &PrivateKey,
        block: Block,
        view: View,
        justify: Option<NewView>,
        parent: Option<QuorumCertificate>,
    ) -> Self {
        let round = Round::new(block.height(), view);
        let signature = signer.sign(
            &namespaces.proposal,
            &vote_message(block.header().shard, round, &block.digest()),
        );
        Self {
            block,
            view,
            justify,
            parent,
            signature,
        }
    }

    pub fn round(&self) -> Round {
        Round::new(self.block.height(), self.view)
    }

    /// Verify the proposal was signed by `public_key`.
    pub fn verify(&self, namespaces: &Namespaces, public_key: &PublicKey) -> bool {
        public_key.verify(
            &namespaces.proposal,
            &vote_message(self.block.header().shard, self.round(), &self.block.digest()),
            &self.signature,
        )
    }
}

impl Write for Proposal {
    fn write(&self, buf: &mut impl BufMut) {
        self.block.write(buf);
        self.view.write(buf);
        self.justify.write(buf);
        self.parent.write(buf);
        self.signature.write(buf);
    }
}

impl EncodeSize for Proposal {
    fn encode_size(&self) -> usize {
        self.block.encode_size()
            + self.view.encode_size()
            + self.justify.encode_size()
            + self.parent.encode_size()
            + self.signature.encode_size()
    }
}

impl Read for Proposal {
    type Cfg = Limits;

    fn read_cfg(buf: &mut impl Buf, limits: &Limits) -> Result<Self, CodecError> {
        Ok(Self {
            block: Block::read_cfg(buf, limits)?,
            view: View::read(buf)?,
            justify: Option::<NewView>::read_cfg(buf, &limits.max_committee_size)?,
            parent: Option::<QuorumCertificate>::read_cfg(buf, &limits.max_committee_size)?,
            signature: Signature::read(buf)?,
        })
    }
}

/// Checkpoint of a shard's finalized chain submitted to the beacon chain.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CrosslinkPayload {
    pub shard: ShardId,
    pub epoch: Epoch,
    /// Hash of the checkpointed block.
    pub block_root: Digest,
    pub state_root: Digest,
    /// Root of the previous checkpoint payload ([Digest::ZERO] for the first).
    pub parent: Digest,
    /// Height of the checkpointed block.
    pub slot: Height,
}

impl CrosslinkPayload {
    pub fn root(&self) -> Digest {
        hash(&self.encode())
    }
}

impl Write for CrosslinkPayload {
    fn write(&self, buf: &mut impl BufMut) {
        self.shard.write(buf);
        self.epoch.write(buf);
        self.block_root.write(buf);
        self.state_root.write(buf);
        self.parent.write(buf);
        self.slot.write(buf);
    }
}

impl Read for CrosslinkPayload {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        Ok(Self {
            shard: ShardId::read(buf)?,
            epoch: Epoch::read(buf)?,
            block_root: Digest::read(buf)?,
            state_root: Digest::read(buf)?,
            parent: Digest::read(buf)?,
            slot: Height::read(buf)?,
        })
    }
}

impl FixedSize for CrosslinkPayload {
    const SIZE: usize =
        ShardId::SIZE + Epoch::SIZE + Digest::SIZE * 3 + Height::SIZE;
}

impl EncodeSize for CrosslinkPayload {
    fn encode_size(&self) -> usize {
        Self::SIZE
    }
}

/// A committee member's signature over a crosslink payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CrosslinkVote {
    pub validator: ValidatorId,
    pub payload: CrosslinkPayload,
    pub signature: Signature,
}

impl CrosslinkVote {
    pub fn sign(
        namespaces: &Namespaces,
        signer: &PrivateKey,
        validator: ValidatorId,
        payload: CrosslinkPayload,
    ) -> Self {
        let signature = signer.sign(&namespaces.crosslink, &payload.encode());
        Self {
            validator,
            payload,
            signature,
        }
    }

    pub fn verify(&self, namespaces: &Namespaces, committee: &Committee) -> bool {
        if self.payload.shard != committee.shard() || self.payload.epoch != committee.epoch() {
            return false;
        }
        let Some(public_key) = committee.public_key(self.validator) else {
            return false;
        };
        public_key.verify(&namespaces.crosslink, &self.payload.encode(), &self.signature)
    }
}

impl Write for CrosslinkVote {
    fn write(&self, buf: &mut impl BufMut) {
        self.validator.write(buf);
        self.payload.write(buf);
        self.signature.write(buf);
    }
}

impl Read for CrosslinkVote {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        Ok(Self {
            validator: ValidatorId::read(buf)?,
            payload: CrosslinkPayload::read(buf)?,
            signature: Signature::read(buf)?,
        })
    }
}

impl FixedSize for CrosslinkVote {
    const SIZE: usize = ValidatorId::SIZE + CrosslinkPayload::SIZE + Signature::SIZE;
}

impl EncodeSize for CrosslinkVote {
    fn encode_size(&self) -> usize {
        Self::SIZE
    }
}

/// A crosslink signed by a quorum of the epoch's committee.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Crosslink {
    pub payload: CrosslinkPayload,
    pub signature: Signature,
    pub signers: BitVec,
}

impl Crosslink {
    /// Verify the crosslink against the committee of its shard and epoch.
    ///
    /// This is the check the beacon chain performs before accepting a checkpoint.
    pub fn verify(&self, namespaces: &Namespaces, committee: &Committee) -> bool {
        if self.payload.shard != committee.shard() || self.payload.epoch != committee.epoch() {
            return false;
        }
        let Some(keys) = quorum_keys(committee, &self.signers) else {
            return false;
        };
        aggregate_verify(
            &namespaces.crosslink,
            &self.payload.encode(),
            keys,
            &self.signature,
        )
    }
}

impl Write for Crosslink {
    fn write(&self, buf: &mut impl BufMut) {
        self.payload.write(buf);
        self.signature.write(buf);
        self.signers.write(buf);
    }
}

impl EncodeSize for Crosslink {
    fn encode_size(&self) -> usize {
        self.payload.encode_size() + self.signature.encode_size() + self.signers.encode_size()
    }
}

impl Read for Crosslink {
    /// Maximum committee size.
    type Cfg = usize;

    fn read_cfg(buf: &mut impl Buf, max_committee: &usize) -> Result<Self, CodecError> {
        Ok(Self {
            payload: CrosslinkPayload::read(buf)?,
            signature: Signature::read(buf)?,
            signers: BitVec::read_cfg(buf, max_committee)?,
        })
    }
}

const PROPOSAL_TAG: u8 = 0;
const PREVOTE_TAG: u8 = 1;
const PRECOMMIT_TAG: u8 = 2;
const VIEW_CHANGE_TAG: u8 = 3;
const NEW_VIEW_TAG: u8 = 4;
const CROSSLINK_TAG: u8 = 5;

/// Messages exchanged by committee members.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    Proposal(Proposal),
    PreVote(Vote),
    PreCommit(Vote),
    ViewChange(ViewChange),
    NewView(NewView),
    Crosslink(CrosslinkVote),
}

impl Message {
    /// Height the message refers to.
    pub fn height(&self) -> Height {
        match self {
            Message::Proposal(proposal) => proposal.block.height(),
            Message::PreVote(vote) | Message::PreCommit(vote) => vote.height(),
            Message::ViewChange(view_change) => view_change.height,
            Message::NewView(new_view) => new_view.height,
            Message::Crosslink(vote) => vote.payload.slot,
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Proposal(_) => "proposal",
            Message::PreVote(_) => "prevote",
            Message::PreCommit(_) => "precommit",
            Message::ViewChange(_) => "view_change",
            Message::NewView(_) => "new_view",
            Message::Crosslink(_) => "crosslink",
        }
    }
}

impl Write for Message {
    fn write(&self, buf: &mut impl BufMut) {
        match self {
            Message::Proposal(proposal) => {
                PROPOSAL_TAG.write(buf);
                proposal.write(buf);
            }
            Message::PreVote(vote) => {
                PREVOTE_TAG.write(buf);
                vote.write(buf);
            }
            Message::PreCommit(vote) => {
                PRECOMMIT_TAG.write(buf);
                vote.write(buf);
            }
            Message::ViewChange(view_change) => {
                VIEW_CHANGE_TAG.write(buf);
                view_change.write(buf);
            }
            Message::NewView(new_view) => {
                NEW_VIEW_TAG.write(buf);
                new_view.write(buf);
            }
            Message::Crosslink(vote) => {
                CROSSLINK_TAG.write(buf);
                vote.write(buf);
            }
        }
    }
}

impl EncodeSize for Message {
    fn encode_size(&self) -> usize {
        1 + match self {
            Message::Proposal(proposal) => proposal.encode_size(),
            Message::PreVote(vote) | Message::PreCommit(vote) => vote.encode_size(),
            Message::ViewChange(view_change) => view_change.encode_size(),
            Message::NewView(new_view) => new_view.encode_size(),
            Message::Crosslink(vote) => vote.encode_size(),
        }
    }
}

impl Read for Message {
    type Cfg = Limits;

    fn read_cfg(buf: &mut impl Buf, limits: &Limits) -> Result<Self, CodecError> {
        let tag = u8::read(buf)?;
        let message = match tag {
            PROPOSAL_TAG => Message::Proposal(Proposal::read_cfg(buf, limits)?),
            PREVOTE_TAG => {
                let vote = Vote::read(buf)?;
                if vote.phase != Phase::PreVote {
                    return Err(CodecError::Invalid("Message", "phase does not match tag"));
                }
                Message::PreVote(vote)
            }
            PRECOMMIT_TAG => {
                let vote = Vote::read(buf)?;
                if vote.phase != Phase::PreCommit {
                    return Err(CodecError::Invalid("Message", "phase does not match tag"));
                }
                Message::PreCommit(vote)
            }
            VIEW_CHANGE_TAG => {
                Message::ViewChange(ViewChange::read_cfg(buf, &limits.max_committee_size)?)
            }
            NEW_VIEW_TAG => Message::NewView(NewView::read_cfg(buf, &limits.max_committee_size)?),
            CROSSLINK_TAG => Message::Crosslink(CrosslinkVote::read(buf)?),
            _ => return Err(CodecError::InvalidEnum("Message", tag)),
        };
        Ok(message)
    }
}

/// A [Message] addressed to a shard.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub shard: ShardId,
    pub message: Message,
}

impl Write for Envelope {
    fn write(&self, buf: &mut impl BufMut) {
        self.shard.write(buf);
        self.message.write(buf);
    }
}

impl EncodeSize for Envelope {
    fn encode_size(&self) -> usize {
        self.shard.encode_size() + self.message.encode_size()
    }
}

impl Read for Envelope {
    type Cfg = Limits;

    fn read_cfg(buf: &mut impl Buf, limits: &Limits) -> Result<Self, CodecError> {
        let shard = ShardId::read(buf)?;
        let message = Message::read_cfg(buf, limits)?;
        Ok(Self { shard, message })
    }
}

/// The last finalized block a shard builds on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tip {
    pub height: Height,
    pub digest: Digest,
    pub timestamp: u64,
    pub state_root: Digest,
}

impl Tip {
    /// A tip for a chain that starts at `height` zero.
    pub fn genesis(digest: Digest) -> Self {
        Self {
            height: 0,
            digest,
            timestamp: 0,
            state_root: Digest::ZERO,
        }
    }
}

/// Request passed to the execution collaborator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Context {
    pub shard: ShardId,
    pub round: Round,
    pub parent: Tip,
    pub proposer: ValidatorId,
}

/// Block contents built by the execution collaborator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Payload {
    pub body: Body,
    /// State root after applying `body` to the parent state.
    pub state_root: Digest,
}

/// A block became final.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockFinalized {
    pub block_hash: Digest,
    pub height: Height,
    pub qc: QuorumCertificate,
    pub block: Block,
}

/// Proof of misbehavior.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Proof {
    /// Two different votes for the same round and phase.
    ConflictingVotes(Vote, Vote),
    /// Two different proposals for the same round.
    ConflictingProposals(Box<Proposal>, Box<Proposal>),
    /// A correctly signed block that fails structural validation.
    InvalidProposal(Box<Block>),
    /// Two different crosslink payloads signed for the same slot.
    ConflictingCrosslinks(CrosslinkVote, CrosslinkVote),
}

/// Kind of [Proof].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EvidenceType {
    EquivocatingVote,
    EquivocatingProposal,
    InvalidProposal,
    EquivocatingCrosslink,
}

/// Evidence that a validator misbehaved, forwarded to the slashing module.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlashableEvidence {
    pub validator: ValidatorId,
    pub proof: Proof,
}

impl SlashableEvidence {
    pub fn evidence_type(&self) -> EvidenceType {
        match self.proof {
            Proof::ConflictingVotes(..) => EvidenceType::EquivocatingVote,
            Proof::ConflictingProposals(..) => EvidenceType::EquivocatingProposal,
            Proof::InvalidProposal(..) => EvidenceType::InvalidProposal,
            Proof::ConflictingCrosslinks(..) => EvidenceType::EquivocatingCrosslink,
        }
    }
}

/// Conditions that require operator attention.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Alert {
    /// View change has not reached quorum after repeated attempts.
    Liveness {
        height: Height,
        view: View,
        attempts: u32,
    },
    /// The randomness beacon has no seed for the epoch; the shard is halted.
    SeedUnavailable { epoch: Epoch },
    /// A committee could not be derived for the epoch; the shard is halted.
    CommitteeUnavailable { epoch: Epoch, reason: String },
    /// The beacon chain rejected a crosslink.
    CrosslinkRejected { slot: Height, reason: String },
}

/// Events reported by the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Activity {
    Finalized(BlockFinalized),
    Evidence(SlashableEvidence),
    Alert(Alert),
}
