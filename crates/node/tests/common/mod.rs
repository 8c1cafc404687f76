#![allow(dead_code)]

use std::sync::Arc;

use tempfile::TempDir;
use zend::admission::{AdmitOutcome, MempoolPolicy};
use zend::context::{BlockReport, NodeContext};
use zend::mempool::{Mempool, MempoolError};
use zend::proof_queue::ProofQueue;
use zend_chainstate::commitment::sc_txs_commitment;
use zend_chainstate::delay::DelayPolicy;
use zend_chainstate::proof::TrustingVerifier;
use zend_chainstate::validation::{coinbase_height_script, ValidationFlags};
use zend_chainstate::{ChainEvent, ChainOptions, ChainState};
use zend_consensus::constants::{BLOCK_VERSION_SC_SUPPORT, SC_CERT_VERSION, SC_TX_VERSION};
use zend_consensus::money::Amount;
use zend_consensus::{
    block_subsidy, chain_params, community_fund_amount, community_fund_script, ConsensusParams,
    Hash256, Network,
};
use zend_primitives::transaction::SEQUENCE_FINAL;
use zend_primitives::{
    BackwardTransfer, Block, BlockHeader, OutPoint, ScCertificate, ScCreationOutput,
    Transaction, TxBase, TxIn, TxOut,
};
use zend_storage::memory::MemoryStore;

pub const OP_TRUE: u8 = 0x51;
pub const EPOCH_LENGTH: i32 = 10;
pub const SC_VALUE: Amount = 5_000_000;

pub struct Node {
    pub ctx: NodeContext<MemoryStore>,
    pub params: ConsensusParams,
    _dir: TempDir,
}

impl Node {
    pub fn new() -> Self {
        Self::with_proofs(None)
    }

    /// A regtest node whose mempool proofs go to `proofs` when set.
    pub fn with_proofs(proofs: Option<ProofQueue>) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(MemoryStore::new());
        let params = chain_params(Network::Regtest);
        let mut options = ChainOptions::new(Arc::new(TrustingVerifier::new()));
        options.flags = ValidationFlags::without_pow();
        options.delay = DelayPolicy::disabled();
        let mut chain = ChainState::open_in_dir(store, dir.path(), params.clone(), options)
            .expect("open chain state");
        chain.init_genesis().expect("genesis");
        let ctx = NodeContext::new(
            chain,
            Mempool::default(),
            MempoolPolicy::standard(100, false),
            proofs,
            None,
        );
        Self {
            ctx,
            params: params.consensus,
            _dir: dir,
        }
    }

    pub fn tip(&self) -> Hash256 {
        self.ctx.read().chain.tip_hash().expect("tip")
    }

    pub fn height(&self) -> i32 {
        self.ctx.read().chain.tip_height()
    }

    pub fn block_hash(&self, height: i32) -> Hash256 {
        self.ctx
            .read()
            .chain
            .block_hash(height)
            .expect("active height")
    }

    pub fn now(&self) -> i64 {
        i64::from(self.params.genesis_time) + 10_000_000
    }

    pub fn in_pool(&self, id: &Hash256) -> bool {
        self.ctx.read().mempool.contains(id)
    }

    pub fn pool_size(&self) -> usize {
        self.ctx.read().mempool.size()
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

    pub fn build(
        &self,
        prev: &Hash256,
        txs: Vec<Transaction>,
        certs: Vec<ScCertificate>,
        tag: u8,
    ) -> Block {
        let (height, time, bits) = {
            let state = self.ctx.read();
            let tree = state.chain.tree();
            let parent = tree.node(tree.lookup(prev).expect("known parent"));
            (parent.height + 1, parent.header.time, parent.header.bits)
        };
        let mut transactions = vec![self.coinbase(height, tag)];
        transactions.extend(txs);
        let mut block = Block {
            header: BlockHeader {
                version: BLOCK_VERSION_SC_SUPPORT,
                prev_block: *prev,
                merkle_root: [0u8; 32],
                sc_txs_commitment: [0u8; 32],
                time: time + 60,
                bits,
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

    pub fn submit(&self, block: &Block) -> BlockReport {
        self.ctx.process_block(block, self.now()).expect("submit")
    }

    pub fn mine(&self, txs: Vec<Transaction>, certs: Vec<ScCertificate>) -> (Block, BlockReport) {
        let block = self.build(&self.tip(), txs, certs, 0);
        let report = self.submit(&block);
        assert!(
            !report
                .events
                .iter()
                .any(|event| matches!(event, ChainEvent::BlockInvalid { .. })),
            "mined block rejected: {:?}",
            report.events
        );
        assert_eq!(self.tip(), block.hash());
        (block, report)
    }

    pub fn mine_empty(&self, count: usize) -> Vec<Block> {
        (0..count)
            .map(|_| self.mine(Vec::new(), Vec::new()).0)
            .collect()
    }

    pub fn admit_tx(&self, tx: Transaction, limit_free: bool) -> Result<AdmitOutcome, MempoolError> {
        self.ctx.admit(TxBase::from(tx), limit_free)
    }

    pub fn admit_cert(&self, cert: ScCertificate) -> Result<AdmitOutcome, MempoolError> {
        self.ctx.admit(TxBase::from(cert), false)
    }

    /// Regtest chain with one sidechain created at height 102 and the tip at
    /// `tip_height`. Returns the sidechain id and the mined blocks.
    pub fn with_sidechain(tip_height: i32, proofs: Option<ProofQueue>) -> (Self, Hash256) {
        let node = Self::with_proofs(proofs);
        let mined = node.mine_empty(101);
        let (creation, sc_id) = create_sidechain(coinbase_out(&mined[0]), EPOCH_LENGTH, SC_VALUE);
        node.mine(vec![creation], Vec::new());
        let remaining = tip_height - node.height();
        node.mine_empty(remaining as usize);
        (node, sc_id)
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

pub fn coinbase_out(block: &Block) -> (OutPoint, Amount) {
    let coinbase = &block.transactions[0];
    (OutPoint::new(coinbase.txid(), 0), coinbase.vout[0].value)
}

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
