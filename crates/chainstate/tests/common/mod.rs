#![allow(dead_code)]

use std::sync::Arc;

use tempfile::TempDir;
use zend_chainstate::commitment::sc_txs_commitment;
use zend_chainstate::delay::DelayPolicy;
use zend_chainstate::genesis::genesis_block;
use zend_chainstate::proof::TrustingVerifier;
use zend_chainstate::validation::{coinbase_height_script, ValidationFlags};
use zend_chainstate::{ChainEvent, ChainOptions, ChainState, ChainStateError};
use zend_consensus::constants::{BLOCK_VERSION_SC_SUPPORT, SC_CERT_VERSION, SC_TX_VERSION};
use zend_consensus::money::Amount;
use zend_consensus::{
    block_subsidy, chain_params, community_fund_amount, community_fund_script, ConsensusParams,
    Hash256, Network,
};
use zend_primitives::transaction::SEQUENCE_FINAL;
use zend_primitives::{
    BackwardTransfer, Block, BlockHeader, OutPoint, ScCertificate, ScCreationOutput,
    Transaction, TxIn, TxOut,
};
use zend_storage::memory::MemoryStore;
use zend_storage::{Column, ScanResult};

pub const OP_TRUE: u8 = 0x51;

/// Columns holding ledger state; the block index is left out because
/// validity flags legitimately change across a disconnect.
pub const LEDGER_COLUMNS: [Column; 8] = [
    Column::Coins,
    Column::Sidechains,
    Column::ScEvents,
    Column::ScCommitmentHeight,
    Column::Anchors,
    Column::Nullifiers,
    Column::CswNullifiers,
    Column::Meta,
];

pub struct Harness {
    pub state: ChainState<MemoryStore>,
    pub store: Arc<MemoryStore>,
    pub params: ConsensusParams,
    _dir: TempDir,
}

impl Harness {
    pub fn new(delay: DelayPolicy) -> Self {
        Self::with_threads(delay, 0)
    }

    pub fn with_threads(delay: DelayPolicy, script_threads: usize) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(MemoryStore::new());
        let params = chain_params(Network::Regtest);
        let mut options = ChainOptions::new(Arc::new(TrustingVerifier::new()));
        options.flags = ValidationFlags::without_pow();
        options.delay = delay;
        options.script_threads = script_threads;
        options.tx_index = true;
        let mut state =
            ChainState::open_in_dir(Arc::clone(&store), dir.path(), params.clone(), options)
                .expect("open chain state");
        state.init_genesis().expect("genesis");
        Self {
            state,
            store,
            params: params.consensus,
            _dir: dir,
        }
    }

    pub fn genesis_hash(&self) -> Hash256 {
        genesis_block(&self.params).hash()
    }

    pub fn tip(&self) -> Hash256 {
        self.state.tip_hash().expect("tip")
    }

    pub fn height(&self) -> i32 {
        self.state.tip_height()
    }

    pub fn now(&self) -> i64 {
        i64::from(self.params.genesis_time) + 10_000_000
    }

    pub fn coinbase(&self, height: i32, tag: u8) -> Transaction {
        let mut script_sig = coinbase_height_script(height);
        script_sig.extend_from_slice(&[0x01, tag]);
        let fund = community_fund_amount(height, &self.params);
        let mut vout = vec![TxOut {
            value: block_subsidy(height, &self.params) - fund,
            script_pubkey: vec![OP_TRUE],
        }];
        if fund > 0 {
            vout.push(TxOut {
                value: fund,
                script_pubkey: community_fund_script(&self.params),
            });
        }
        Transaction {
            vin: vec![TxIn {
                prevout: OutPoint::null(),
                script_sig,
                sequence: SEQUENCE_FINAL,
            }],
            vout,
            ..spend(Vec::new(), Vec::new())
        }
    }

    /// A block on `prev` with a fresh coinbase followed by `txs`.
    pub fn build(
        &self,
        prev: &Hash256,
        txs: Vec<Transaction>,
        certs: Vec<ScCertificate>,
        tag: u8,
    ) -> Block {
        let tree = self.state.tree();
        let parent = tree.node(tree.lookup(prev).expect("known parent"));
        let height = parent.height + 1;
        let mut transactions = vec![self.coinbase(height, tag)];
        transactions.extend(txs);
        let mut block = Block {
            header: BlockHeader {
                version: BLOCK_VERSION_SC_SUPPORT,
                prev_block: *prev,
                merkle_root: [0u8; 32],
                sc_txs_commitment: [0u8; 32],
                time: parent.header.time + 60,
                bits: parent.header.bits,
                nonce: [tag; 32],
                solution: Vec::new(),
            },
            transactions,
            certificates: certs,
        };
        block.header.merkle_root = block.compute_merkle_root().0;
        block.header.sc_txs_commitment = sc_txs_commitment(&block);
        block
    }

    pub fn submit(&mut self, block: &Block) -> Result<Vec<ChainEvent>, ChainStateError> {
        let now = self.now();
        self.state.accept_block(block, now)?;
        self.state.activate_best_chain()
    }

    /// Mines one block on the tip and requires it to become the tip.
    pub fn mine(&mut self, txs: Vec<Transaction>, certs: Vec<ScCertificate>) -> Block {
        let block = self.build(&self.tip(), txs, certs, 0);
        let events = self.submit(&block).expect("submit");
        assert!(
            !events
                .iter()
                .any(|event| matches!(event, ChainEvent::BlockInvalid { .. })),
            "mined block rejected: {events:?}"
        );
        assert_eq!(self.tip(), block.hash());
        block
    }

    pub fn mine_empty(&mut self, count: usize) -> Vec<Block> {
        (0..count).map(|_| self.mine(Vec::new(), Vec::new())).collect()
    }

    /// Stores `count` blocks on `prev` without activating them.
    pub fn extend(&mut self, prev: &Hash256, count: usize, tag: u8) -> Vec<Block> {
        let mut prev = *prev;
        let mut blocks = Vec::with_capacity(count);
        for _ in 0..count {
            let block = self.build(&prev, Vec::new(), Vec::new(), tag);
            let now = self.now();
            self.state.accept_block(&block, now).expect("accept");
            prev = block.hash();
            blocks.push(block);
        }
        blocks
    }

    /// Submits a block expected to fail while connecting and returns the reason.
    pub fn reject(&mut self, txs: Vec<Transaction>, certs: Vec<ScCertificate>) -> String {
        let block = self.build(&self.tip(), txs, certs, 0xee);
        let events = self.submit(&block).expect("no system error");
        events
            .into_iter()
            .find_map(|event| match event {
                ChainEvent::BlockInvalid { hash, reason, .. } if hash == block.hash() => {
                    Some(reason.reason)
                }
                _ => None,
            })
            .expect("block rejected")
    }

    pub fn ledger(&self) -> Vec<ScanResult> {
        LEDGER_COLUMNS
            .iter()
            .map(|column| self.store.dump(*column).expect("dump"))
            .collect()
    }
}

pub fn spend(inputs: Vec<OutPoint>, outputs: Vec<Amount>) -> Transaction {
    Transaction {
        version: 1,
        vin: inputs
            .into_iter()
            .map(|prevout| TxIn {
                prevout,
                script_sig: Vec::new(),
                sequence: SEQUENCE_FINAL,
            })
            .collect(),
        vout: outputs
            .into_iter()
            .map(|value| TxOut {
                value,
                script_pubkey: vec![OP_TRUE],
            })
            .collect(),
        vcsw_ccin: Vec::new(),
        vsc_ccout: Vec::new(),
        vft_ccout: Vec::new(),
        lock_time: 0,
        join_splits: Vec::new(),
    }
}

/// First miner output of `block`'s coinbase.
pub fn coinbase_out(block: &Block) -> (OutPoint, Amount) {
    let coinbase = &block.transactions[0];
    (OutPoint::new(coinbase.txid(), 0), coinbase.vout[0].value)
}

/// Creates one sidechain funded by `value` out of `input`, paying the rest
/// back as change.
pub fn create_sidechain(
    input: (OutPoint, Amount),
    epoch_length: i32,
    value: Amount,
) -> (Transaction, Hash256) {
    let mut tx = spend(vec![input.0], vec![input.1 - value - 1_000]);
    tx.version = SC_TX_VERSION;
    tx.vsc_ccout.push(ScCreationOutput {
        withdrawal_epoch_length: epoch_length,
        value,
        address: [0x5c; 32],
        custom_data: Vec::new(),
        wcert_vk: vec![0x01; 16],
    });
    let txid = tx.txid();
    let sc_id = tx.sc_id_for_creation(&txid, 0);
    (tx, sc_id)
}

pub fn certificate(
    sc_id: Hash256,
    epoch_number: i32,
    quality: i64,
    end_epoch_block_hash: Hash256,
    amounts: &[Amount],
) -> ScCertificate {
    ScCertificate {
        version: SC_CERT_VERSION,
        sc_id,
        epoch_number,
        quality,
        end_epoch_block_hash,
        sc_proof: vec![0xaa; 8],
        vin: Vec::new(),
        vout: Vec::new(),
        backward_transfers: amounts
            .iter()
            .map(|amount| BackwardTransfer {
                amount: *amount,
                pub_key_hash: [0x42; 20],
            })
            .collect(),
    }
}
