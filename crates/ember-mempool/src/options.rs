use ember_primitives::contract::DEFAULT_MIN_GAS_PRICE;

/// Configuration options for the transaction memory pool.
#[derive(Clone, Debug)]
pub struct MemPoolOptions {
    /// DGP-mandated minimum gas price, in satoshis per gas. Contract
    /// transactions offering less rank below everything else in the mining
    /// order.
    pub min_gas_price: u64,
}

impl Default for MemPoolOptions {
    fn default() -> Self {
        Self {
            min_gas_price: DEFAULT_MIN_GAS_PRICE,
        }
    }
}

impl MemPoolOptions {
    /// Create a builder for configuring mempool options.
    pub fn builder() -> MemPoolOptionsBuilder {
        MemPoolOptionsBuilder::default()
    }
}

/// Builder pattern for [`MemPoolOptions`].
#[derive(Default)]
pub struct MemPoolOptionsBuilder {
    options: MemPoolOptions,
}

impl MemPoolOptionsBuilder {
    /// Set the DGP minimum gas price.
    pub fn min_gas_price(mut self, min_gas_price: u64) -> Self {
        self.options.min_gas_price = min_gas_price;
        self
    }

    /// Build the final [`MemPoolOptions`].
    pub fn build(self) -> MemPoolOptions {
        self.options
    }
}
