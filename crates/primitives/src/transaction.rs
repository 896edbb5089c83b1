//! Inputs, outputs, transaction bodies, and transactions.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use mweb_consensus::{
    params::{MAX_KERNEL_EXTRADATA_SIZE, MAX_PEGOUT_SCRIPT_SIZE, MIN_PEGOUT_SCRIPT_SIZE},
    weight, Amount, ConsensusError, Hash256,
};
use mweb_crypto::{
    BlindingFactor, Commitment, Crypto, CryptoError, ProofData, PublicKey, SignedMessage,
    Signature, COMMITMENT_SIZE, PUBLIC_KEY_SIZE, SIGNATURE_SIZE,
};

use crate::encoding::{
    decode_list, encode_list, Decodable, DecodeError, Decoder, Encodable, Encoder,
};
use crate::hash::{hashed, hashed_bytes};
use crate::kernel::{kernel_order, Kernel, PegInCoin, PegOutCoin};

impl Encodable for SignedMessage {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_bytes(&self.message);
        encoder.write_bytes(self.public_key.as_bytes());
        encoder.write_bytes(self.signature.as_bytes());
    }
}

impl Decodable for SignedMessage {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let message = decoder.read_fixed::<32>()?;
        let public_key = PublicKey::from_bytes(decoder.read_fixed::<PUBLIC_KEY_SIZE>()?);
        let signature = Signature::from_bytes(decoder.read_fixed::<SIGNATURE_SIZE>()?);
        Ok(Self {
            message,
            public_key,
            signature,
        })
    }
}

/// Hash an owner signature for canonical ordering and duplicate checks.
pub fn owner_sig_hash(signed: &SignedMessage) -> Hash256 {
    hashed(signed)
}

/// Spends the output committed to by `commitment`.
#[derive(Clone, Debug)]
pub struct Input {
    commitment: Commitment,
    input_pubkey: PublicKey,
    output_pubkey: PublicKey,
    signature: Signature,
    hash: Hash256,
}

impl Input {
    pub fn new(
        commitment: Commitment,
        input_pubkey: PublicKey,
        output_pubkey: PublicKey,
        signature: Signature,
    ) -> Self {
        let mut input = Self {
            commitment,
            input_pubkey,
            output_pubkey,
            signature,
            hash: [0u8; 32],
        };
        input.hash = hashed(&input);
        input
    }

    /// Sign a spend of `commitment` with the input key.
    pub fn create(
        crypto: &dyn Crypto,
        commitment: Commitment,
        input_key: &BlindingFactor,
        output_pubkey: PublicKey,
    ) -> Result<Self, CryptoError> {
        let input_pubkey = crypto.public_key_of(input_key)?;
        let signature = crypto.sign(input_key, &hashed_bytes(commitment.as_bytes()))?;
        Ok(Self::new(
            commitment,
            input_pubkey,
            output_pubkey,
            signature,
        ))
    }

    pub fn commitment(&self) -> &Commitment {
        &self.commitment
    }

    pub fn input_pubkey(&self) -> &PublicKey {
        &self.input_pubkey
    }

    pub fn output_pubkey(&self) -> &PublicKey {
        &self.output_pubkey
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn hash(&self) -> &Hash256 {
        &self.hash
    }

    pub fn build_signed_msg(&self) -> SignedMessage {
        SignedMessage::new(
            hashed_bytes(self.commitment.as_bytes()),
            self.input_pubkey,
            self.signature,
        )
    }
}

impl PartialEq for Input {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for Input {}

impl Encodable for Input {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_bytes(self.commitment.as_bytes());
        encoder.write_bytes(self.input_pubkey.as_bytes());
        encoder.write_bytes(self.output_pubkey.as_bytes());
        encoder.write_bytes(self.signature.as_bytes());
    }
}

impl Decodable for Input {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let commitment = Commitment::from_bytes(decoder.read_fixed::<COMMITMENT_SIZE>()?);
        let input_pubkey = PublicKey::from_bytes(decoder.read_fixed::<PUBLIC_KEY_SIZE>()?);
        let output_pubkey = PublicKey::from_bytes(decoder.read_fixed::<PUBLIC_KEY_SIZE>()?);
        let signature = Signature::from_bytes(decoder.read_fixed::<SIGNATURE_SIZE>()?);
        Ok(Self::new(
            commitment,
            input_pubkey,
            output_pubkey,
            signature,
        ))
    }
}

/// Output created by a peg-in kernel; subject to the maturity rule.
pub const OUTPUT_FEATURE_PEGGED_IN: u8 = 0x01;

/// The plaintext-visible part of an output, committed to by its range
/// proof and signature.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OutputMessage {
    pub features: u8,
    pub receiver_pubkey: PublicKey,
    pub key_exchange_pubkey: PublicKey,
    pub view_tag: u8,
    pub masked_value: u64,
    pub masked_nonce: [u8; 16],
    pub sender_pubkey: PublicKey,
}

impl OutputMessage {
    pub fn is_pegged_in(&self) -> bool {
        self.features & OUTPUT_FEATURE_PEGGED_IN != 0
    }
}

impl Encodable for OutputMessage {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_u8(self.features);
        encoder.write_bytes(self.receiver_pubkey.as_bytes());
        encoder.write_bytes(self.key_exchange_pubkey.as_bytes());
        encoder.write_u8(self.view_tag);
        encoder.write_u64_be(self.masked_value);
        encoder.write_bytes(&self.masked_nonce);
        encoder.write_bytes(self.sender_pubkey.as_bytes());
    }
}

impl Decodable for OutputMessage {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            features: decoder.read_u8()?,
            receiver_pubkey: PublicKey::from_bytes(decoder.read_fixed::<PUBLIC_KEY_SIZE>()?),
            key_exchange_pubkey: PublicKey::from_bytes(decoder.read_fixed::<PUBLIC_KEY_SIZE>()?),
            view_tag: decoder.read_u8()?,
            masked_value: decoder.read_u64_be()?,
            masked_nonce: decoder.read_fixed::<16>()?,
            sender_pubkey: PublicKey::from_bytes(decoder.read_fixed::<PUBLIC_KEY_SIZE>()?),
        })
    }
}

/// The part of an output stored as an MMR leaf: commitment plus message,
/// without the range proof.
#[derive(Clone, Debug)]
pub struct OutputId {
    commitment: Commitment,
    message: OutputMessage,
    hash: Hash256,
}

impl OutputId {
    pub fn new(commitment: Commitment, message: OutputMessage) -> Self {
        let mut id = Self {
            commitment,
            message,
            hash: [0u8; 32],
        };
        id.hash = hashed(&id);
        id
    }

    pub fn commitment(&self) -> &Commitment {
        &self.commitment
    }

    pub fn message(&self) -> &OutputMessage {
        &self.message
    }

    pub fn is_pegged_in(&self) -> bool {
        self.message.is_pegged_in()
    }

    pub fn hash(&self) -> &Hash256 {
        &self.hash
    }
}

impl PartialEq for OutputId {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for OutputId {}

impl Encodable for OutputId {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_bytes(self.commitment.as_bytes());
        self.message.consensus_encode(encoder);
    }
}

impl Decodable for OutputId {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let commitment = Commitment::from_bytes(decoder.read_fixed::<COMMITMENT_SIZE>()?);
        let message = OutputMessage::consensus_decode(decoder)?;
        Ok(Self::new(commitment, message))
    }
}

/// A confidential output: commitment, message, range proof, and the
/// sender's signature over all of it.
#[derive(Clone, Debug)]
pub struct Output {
    commitment: Commitment,
    message: OutputMessage,
    signature: Signature,
    range_proof: Arc<Vec<u8>>,
    hash: Hash256,
}

impl Output {
    pub fn new(
        commitment: Commitment,
        message: OutputMessage,
        signature: Signature,
        range_proof: Arc<Vec<u8>>,
    ) -> Self {
        let mut output = Self {
            commitment,
            message,
            signature,
            range_proof,
            hash: [0u8; 32],
        };
        output.hash = hashed(&output);
        output
    }

    /// Build a fully-proven output for `value` blinded with `blind`,
    /// signed by the sender key.
    pub fn create(
        crypto: &dyn Crypto,
        sender_key: &BlindingFactor,
        receiver_pubkey: PublicKey,
        value: u64,
        blind: &BlindingFactor,
    ) -> Result<Self, CryptoError> {
        Self::create_with_features(crypto, 0, sender_key, receiver_pubkey, value, blind)
    }

    /// As [`Output::create`], with explicit feature bits (peg-in
    /// outputs set [`OUTPUT_FEATURE_PEGGED_IN`]).
    pub fn create_with_features(
        crypto: &dyn Crypto,
        features: u8,
        sender_key: &BlindingFactor,
        receiver_pubkey: PublicKey,
        value: u64,
        blind: &BlindingFactor,
    ) -> Result<Self, CryptoError> {
        let commitment = crypto.commit_blinded(value, blind)?;
        let sender_pubkey = crypto.public_key_of(sender_key)?;
        let message = OutputMessage {
            features,
            receiver_pubkey,
            key_exchange_pubkey: receiver_pubkey,
            view_tag: 0,
            masked_value: value,
            masked_nonce: [0u8; 16],
            sender_pubkey,
        };

        let message_bytes = crate::encoding::encode(&message);
        let range_proof = crypto.prove_range(value, blind, &message_bytes)?;

        let sig_message = Self::signature_message(&commitment, &message, &range_proof);
        let signature = crypto.sign(sender_key, &sig_message)?;

        Ok(Self::new(
            commitment,
            message,
            signature,
            Arc::new(range_proof),
        ))
    }

    fn signature_message(
        commitment: &Commitment,
        message: &OutputMessage,
        range_proof: &[u8],
    ) -> Hash256 {
        let mut encoder = Encoder::new();
        encoder.write_bytes(commitment.as_bytes());
        message.consensus_encode(&mut encoder);
        encoder.write_bytes(&hashed_bytes(range_proof));
        hashed_bytes(&encoder.into_inner())
    }

    pub fn commitment(&self) -> &Commitment {
        &self.commitment
    }

    pub fn message(&self) -> &OutputMessage {
        &self.message
    }

    pub fn sender_pubkey(&self) -> &PublicKey {
        &self.message.sender_pubkey
    }

    pub fn receiver_pubkey(&self) -> &PublicKey {
        &self.message.receiver_pubkey
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn range_proof(&self) -> &Arc<Vec<u8>> {
        &self.range_proof
    }

    pub fn hash(&self) -> &Hash256 {
        &self.hash
    }

    pub fn is_pegged_in(&self) -> bool {
        self.message.is_pegged_in()
    }

    pub fn to_output_id(&self) -> OutputId {
        OutputId::new(self.commitment, self.message.clone())
    }

    pub fn build_signed_msg(&self) -> SignedMessage {
        SignedMessage::new(
            Self::signature_message(&self.commitment, &self.message, &self.range_proof),
            self.message.sender_pubkey,
            self.signature,
        )
    }

    pub fn build_proof_data(&self) -> ProofData {
        ProofData {
            commitment: self.commitment,
            proof: self.range_proof.as_ref().clone(),
            extra_data: crate::encoding::encode(&self.message),
        }
    }
}

impl PartialEq for Output {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for Output {}

impl Encodable for Output {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_bytes(self.commitment.as_bytes());
        self.message.consensus_encode(encoder);
        encoder.write_bytes(self.signature.as_bytes());
        encoder.write_var_bytes(&self.range_proof);
    }
}

impl Decodable for Output {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let commitment = Commitment::from_bytes(decoder.read_fixed::<COMMITMENT_SIZE>()?);
        let message = OutputMessage::consensus_decode(decoder)?;
        let signature = Signature::from_bytes(decoder.read_fixed::<SIGNATURE_SIZE>()?);
        let range_proof = decoder.read_var_bytes()?;
        Ok(Self::new(
            commitment,
            message,
            signature,
            Arc::new(range_proof),
        ))
    }
}

/// Container for all inputs, outputs, kernels, and owner signatures in a
/// transaction or block. Lists are kept in canonical order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TxBody {
    inputs: Vec<Input>,
    outputs: Vec<Output>,
    kernels: Vec<Kernel>,
    owner_sigs: Vec<SignedMessage>,
}

impl TxBody {
    pub fn new(
        inputs: Vec<Input>,
        outputs: Vec<Output>,
        kernels: Vec<Kernel>,
        owner_sigs: Vec<SignedMessage>,
    ) -> Self {
        Self {
            inputs,
            outputs,
            kernels,
            owner_sigs,
        }
    }

    pub fn inputs(&self) -> &[Input] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    pub fn kernels(&self) -> &[Kernel] {
        &self.kernels
    }

    pub fn owner_sigs(&self) -> &[SignedMessage] {
        &self.owner_sigs
    }

    pub fn input_commits(&self) -> Vec<Commitment> {
        self.inputs.iter().map(|i| *i.commitment()).collect()
    }

    pub fn output_commits(&self) -> Vec<Commitment> {
        self.outputs.iter().map(|o| *o.commitment()).collect()
    }

    pub fn kernel_commits(&self) -> Vec<Commitment> {
        self.kernels.iter().map(|k| *k.commitment()).collect()
    }

    pub fn pegins(&self) -> Vec<PegInCoin> {
        self.kernels
            .iter()
            .filter(|k| k.has_pegin())
            .map(|k| PegInCoin::new(k.pegin(), *k.commitment()))
            .collect()
    }

    pub fn pegin_amount(&self) -> Amount {
        self.kernels.iter().map(|k| k.pegin()).sum()
    }

    pub fn pegouts(&self) -> Vec<PegOutCoin> {
        self.kernels
            .iter()
            .filter_map(|k| k.pegout().cloned())
            .collect()
    }

    pub fn total_fee(&self) -> Amount {
        self.kernels.iter().map(|k| k.fee()).sum()
    }

    pub fn supply_change(&self) -> Amount {
        self.kernels.iter().map(|k| k.supply_change()).sum()
    }

    pub fn lock_height(&self) -> u64 {
        self.kernels
            .iter()
            .map(|k| k.lock_height())
            .max()
            .unwrap_or(0)
    }

    pub fn weight(&self) -> usize {
        weight::calculate(
            self.kernels.len(),
            self.owner_sigs.len(),
            self.outputs.len(),
        )
    }

    /// Context-free validation: weight and size limits, canonical order,
    /// no duplicates, owner signatures referencing real kernels, then
    /// batched signature and range-proof verification.
    pub fn validate(&self, crypto: &dyn Crypto) -> Result<(), ConsensusError> {
        if weight::exceeds_maximum(
            self.kernels.len(),
            self.owner_sigs.len(),
            self.outputs.len(),
        ) {
            return Err(ConsensusError::BlockWeight);
        }

        let size_exceeded = self.kernels.iter().any(|kernel| {
            let script_size = kernel
                .pegout()
                .map(|p| p.script_pubkey.len())
                .unwrap_or(MIN_PEGOUT_SCRIPT_SIZE);
            script_size > MAX_PEGOUT_SCRIPT_SIZE
                || script_size < MIN_PEGOUT_SCRIPT_SIZE
                || kernel.extra_data().len() > MAX_KERNEL_EXTRADATA_SIZE
        });
        if size_exceeded {
            return Err(ConsensusError::BlockWeight);
        }

        let inputs_sorted = self
            .inputs
            .windows(2)
            .all(|w| w[0].commitment() <= w[1].commitment());
        let outputs_sorted = self
            .outputs
            .windows(2)
            .all(|w| w[0].commitment() <= w[1].commitment());
        let kernels_sorted = self
            .kernels
            .windows(2)
            .all(|w| kernel_order(&w[0], &w[1]) != Ordering::Greater);
        let owner_sigs_sorted = self
            .owner_sigs
            .windows(2)
            .all(|w| owner_sig_hash(&w[0]) <= owner_sig_hash(&w[1]));
        if !inputs_sorted || !outputs_sorted || !kernels_sorted || !owner_sigs_sorted {
            return Err(ConsensusError::NotSorted);
        }

        let input_commits: HashSet<Commitment> =
            self.inputs.iter().map(|i| *i.commitment()).collect();
        if input_commits.len() != self.inputs.len() {
            return Err(ConsensusError::DuplicateCommits);
        }
        let output_commits: HashSet<Commitment> =
            self.outputs.iter().map(|o| *o.commitment()).collect();
        if output_commits.len() != self.outputs.len() {
            return Err(ConsensusError::DuplicateCommits);
        }
        let kernel_commits: HashSet<Commitment> =
            self.kernels.iter().map(|k| *k.commitment()).collect();
        if kernel_commits.len() != self.kernels.len() {
            return Err(ConsensusError::DuplicateCommits);
        }
        let owner_sig_hashes: HashSet<Hash256> =
            self.owner_sigs.iter().map(owner_sig_hash).collect();
        if owner_sig_hashes.len() != self.owner_sigs.len() {
            return Err(ConsensusError::DuplicateCommits);
        }

        let kernel_hashes: HashSet<Hash256> =
            self.kernels.iter().map(|k| *k.hash()).collect();
        for owner_sig in &self.owner_sigs {
            if !kernel_hashes.contains(&owner_sig.message) {
                return Err(ConsensusError::KernelMissing);
            }
        }

        let mut signatures = Vec::with_capacity(
            self.kernels.len() + self.inputs.len() + self.outputs.len() + self.owner_sigs.len(),
        );
        for kernel in &self.kernels {
            let public_key = crypto
                .to_public_key(kernel.commitment())
                .map_err(|_| ConsensusError::InvalidSig)?;
            signatures.push(SignedMessage::new(
                kernel.signature_message(),
                public_key,
                *kernel.signature(),
            ));
        }
        for input in &self.inputs {
            signatures.push(input.build_signed_msg());
        }
        for output in &self.outputs {
            signatures.push(output.build_signed_msg());
        }
        signatures.extend(self.owner_sigs.iter().cloned());

        if !crypto.batch_verify(&signatures) {
            return Err(ConsensusError::InvalidSig);
        }

        let proofs: Vec<ProofData> = self.outputs.iter().map(|o| o.build_proof_data()).collect();
        if !crypto.verify_range_proofs(&proofs) {
            return Err(ConsensusError::RangeProof);
        }

        Ok(())
    }
}

impl Encodable for TxBody {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encode_list(encoder, &self.inputs);
        encode_list(encoder, &self.outputs);
        encode_list(encoder, &self.kernels);
        encode_list(encoder, &self.owner_sigs);
    }
}

impl Decodable for TxBody {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            inputs: decode_list(decoder)?,
            outputs: decode_list(decoder)?,
            kernels: decode_list(decoder)?,
            owner_sigs: decode_list(decoder)?,
        })
    }
}

/// A transaction (or aggregate of transactions) not yet in a block.
#[derive(Clone, Debug)]
pub struct Transaction {
    kernel_offset: BlindingFactor,
    owner_offset: BlindingFactor,
    body: TxBody,
    hash: Hash256,
}

impl Transaction {
    pub fn new(kernel_offset: BlindingFactor, owner_offset: BlindingFactor, body: TxBody) -> Self {
        let mut tx = Self {
            kernel_offset,
            owner_offset,
            body,
            hash: [0u8; 32],
        };
        tx.hash = hashed(&tx);
        tx
    }

    pub fn empty() -> Arc<Self> {
        Arc::new(Self::new(
            BlindingFactor::ZERO,
            BlindingFactor::ZERO,
            TxBody::default(),
        ))
    }

    /// Sort the component lists into canonical order and build the
    /// transaction.
    pub fn create(
        kernel_offset: BlindingFactor,
        owner_offset: BlindingFactor,
        mut inputs: Vec<Input>,
        mut outputs: Vec<Output>,
        mut kernels: Vec<Kernel>,
        mut owner_sigs: Vec<SignedMessage>,
    ) -> Arc<Self> {
        inputs.sort_by(|a, b| a.commitment().cmp(b.commitment()));
        outputs.sort_by(|a, b| a.commitment().cmp(b.commitment()));
        kernels.sort_by(kernel_order);
        owner_sigs.sort_by_key(owner_sig_hash);

        Arc::new(Self::new(
            kernel_offset,
            owner_offset,
            TxBody::new(inputs, outputs, kernels, owner_sigs),
        ))
    }

    pub fn kernel_offset(&self) -> &BlindingFactor {
        &self.kernel_offset
    }

    pub fn owner_offset(&self) -> &BlindingFactor {
        &self.owner_offset
    }

    pub fn body(&self) -> &TxBody {
        &self.body
    }

    pub fn inputs(&self) -> &[Input] {
        self.body.inputs()
    }

    pub fn outputs(&self) -> &[Output] {
        self.body.outputs()
    }

    pub fn kernels(&self) -> &[Kernel] {
        self.body.kernels()
    }

    pub fn owner_sigs(&self) -> &[SignedMessage] {
        self.body.owner_sigs()
    }

    pub fn pegins(&self) -> Vec<PegInCoin> {
        self.body.pegins()
    }

    pub fn pegin_amount(&self) -> Amount {
        self.body.pegin_amount()
    }

    pub fn pegouts(&self) -> Vec<PegOutCoin> {
        self.body.pegouts()
    }

    pub fn total_fee(&self) -> Amount {
        self.body.total_fee()
    }

    pub fn supply_change(&self) -> Amount {
        self.body.supply_change()
    }

    pub fn lock_height(&self) -> u64 {
        self.body.lock_height()
    }

    pub fn weight(&self) -> usize {
        self.body.weight()
    }

    pub fn is_standard(&self) -> bool {
        self.kernels().iter().all(|k| k.is_standard())
    }

    pub fn hash(&self) -> &Hash256 {
        &self.hash
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for Transaction {}

impl Encodable for Transaction {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_bytes(self.kernel_offset.as_bytes());
        encoder.write_bytes(self.owner_offset.as_bytes());
        self.body.consensus_encode(encoder);
    }
}

impl Decodable for Transaction {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let kernel_offset =
            BlindingFactor::from_bytes(decoder.read_fixed::<32>()?);
        let owner_offset = BlindingFactor::from_bytes(decoder.read_fixed::<32>()?);
        let body = TxBody::consensus_decode(decoder)?;
        Ok(Self::new(kernel_offset, owner_offset, body))
    }
}
