//! Shared helpers for chainstate integration tests: a deterministic
//! transaction factory over the sim crypto backend.

#![allow(dead_code)]

use std::sync::Arc;

use mweb_consensus::Amount;
use mweb_crypto::sim::SimCrypto;
use mweb_crypto::{BlindingFactor, Crypto, CryptoCtx};
use mweb_primitives::kernel::{Kernel, PegInCoin, PegOutCoin};
use mweb_primitives::transaction::{Input, Output, Transaction, OUTPUT_FEATURE_PEGGED_IN};

pub fn crypto_ctx() -> CryptoCtx {
    Arc::new(SimCrypto::new())
}

pub fn scalar(value: i128) -> BlindingFactor {
    let mut bytes = [0u8; 32];
    bytes[..16].copy_from_slice(&value.to_le_bytes());
    BlindingFactor(bytes)
}

/// A coin the test wallet can spend: the output plus the secrets that
/// created it.
#[derive(Clone, Debug)]
pub struct TestCoin {
    pub value: u64,
    pub blind: BlindingFactor,
    pub key: BlindingFactor,
    pub output: Output,
}

/// Builds balanced transactions with deterministic blinding factors.
pub struct TxFactory {
    crypto: CryptoCtx,
    next_scalar: i128,
}

impl TxFactory {
    pub fn new(crypto: CryptoCtx) -> Self {
        Self {
            crypto,
            next_scalar: 1000,
        }
    }

    pub fn crypto(&self) -> &dyn Crypto {
        &*self.crypto
    }

    fn next_scalar(&mut self) -> BlindingFactor {
        self.next_scalar += 1;
        scalar(self.next_scalar)
    }

    /// A transaction pegging `amount` into the extension block as one
    /// new output. Returns the transaction, the peg-in list the base
    /// chain would carry, and the created coin.
    pub fn pegin_tx(&mut self, amount: u64) -> (Arc<Transaction>, Vec<PegInCoin>, TestCoin) {
        let (tx, mut coins) = self.create_tx(&[], &[amount], Some(amount as Amount), None, None);
        let pegins = tx.pegins();
        assert_eq!(pegins.len(), 1);
        (tx, pegins, coins.remove(0))
    }

    /// Spend `inputs` into `output_values`, paying `fee`.
    pub fn spend_tx(
        &mut self,
        inputs: &[TestCoin],
        output_values: &[u64],
        fee: Amount,
    ) -> (Arc<Transaction>, Vec<TestCoin>) {
        self.create_tx(inputs, output_values, None, Some(fee), None)
    }

    /// Build a balanced transaction. The caller is responsible for
    /// value balance: `sum(outputs) + fee + pegout = sum(inputs) + pegin`.
    pub fn create_tx(
        &mut self,
        inputs: &[TestCoin],
        output_values: &[u64],
        pegin: Option<Amount>,
        fee: Option<Amount>,
        pegout: Option<PegOutCoin>,
    ) -> (Arc<Transaction>, Vec<TestCoin>) {
        let features = if pegin.is_some() {
            OUTPUT_FEATURE_PEGGED_IN
        } else {
            0
        };

        let mut new_coins = Vec::with_capacity(output_values.len());
        let mut outputs = Vec::with_capacity(output_values.len());
        for value in output_values {
            let blind = self.next_scalar();
            let key = self.next_scalar();
            let receiver = self.crypto.public_key_of(&key).expect("receiver key");
            let output = Output::create_with_features(
                &*self.crypto,
                features,
                &key,
                receiver,
                *value,
                &blind,
            )
            .expect("output");
            new_coins.push(TestCoin {
                value: *value,
                blind,
                key,
                output: output.clone(),
            });
            outputs.push(output);
        }

        let kernel_offset = self.next_scalar();

        // Kernel blind balances the commitment equation:
        // k = sum(output blinds) - sum(input blinds) - offset.
        let output_blinds: Vec<BlindingFactor> =
            new_coins.iter().map(|coin| coin.blind).collect();
        let mut negative_blinds: Vec<BlindingFactor> =
            inputs.iter().map(|coin| coin.blind).collect();
        negative_blinds.push(kernel_offset);
        let kernel_blind = self
            .crypto
            .add_blinding_factors(&output_blinds, &negative_blinds)
            .expect("kernel blind");

        let kernel = Kernel::create(&*self.crypto, &kernel_blind, fee, pegin, pegout, None)
            .expect("kernel");

        let tx_inputs: Vec<Input> = inputs
            .iter()
            .map(|coin| {
                let output_pubkey = self.crypto.public_key_of(&coin.key).expect("output key");
                Input::create(
                    &*self.crypto,
                    *coin.output.commitment(),
                    &coin.key,
                    output_pubkey,
                )
                .expect("input")
            })
            .collect();

        // Owner offset balances the ownership equation:
        // sum(input keys) + offset = sum(output keys).
        let output_keys: Vec<BlindingFactor> = new_coins.iter().map(|coin| coin.key).collect();
        let input_keys: Vec<BlindingFactor> = inputs.iter().map(|coin| coin.key).collect();
        let owner_offset = self
            .crypto
            .add_blinding_factors(&output_keys, &input_keys)
            .expect("owner offset");

        let tx = Transaction::create(
            kernel_offset,
            owner_offset,
            tx_inputs,
            outputs,
            vec![kernel],
            Vec::new(),
        );

        (tx, new_coins)
    }
}
