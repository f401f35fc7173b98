use bitcoin::Txid;

/// Errors that can occur when inserting or adjusting mempool transactions.
#[derive(Debug, thiserror::Error)]
pub enum MemPoolError {
    #[error("transaction {0} is already in the pool")]
    AlreadyInPool(Txid),

    #[error("coinbase transaction is only valid in a block")]
    Coinbase,

    #[error("coinstake transaction is only valid in a block")]
    Coinstake,

    #[error("transaction {0} is not in the pool")]
    NotInPool(Txid),
}
