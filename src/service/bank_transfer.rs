use anyhow::Result;
use rust_decimal::Decimal;

#[async_trait::async_trait]
pub trait BankTransferAdapter: Send + Sync {
    async fn transfer(&self, bank_account_id: &str, amount: Decimal, currency: &str) -> Result<()>;
}

// Simulated transfer; a real deployment swaps this for a banking rails client.
pub struct StubBankAdapter;

#[async_trait::async_trait]
impl BankTransferAdapter for StubBankAdapter {
    async fn transfer(&self, bank_account_id: &str, amount: Decimal, currency: &str) -> Result<()> {
        tracing::info!(bank_account_id, %amount, currency, "transferring settlement funds");
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        Ok(())
    }
}
