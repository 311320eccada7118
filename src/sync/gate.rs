// ABOUTME: Confirmation gate for destructive Full syncs (truncate before copy)
// ABOUTME: A FullSyncGrant can only be obtained through an operator confirmation

use anyhow::Result;
use dialoguer::{theme::ColorfulTheme, Confirm};

use crate::inventory::TableInventory;

/// Proof that the operator confirmed a Full sync.
///
/// The only way to build one is [`FullSyncGrant::request`], so code holding a
/// grant can truncate target tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullSyncGrant {
    _confirmed: (),
}

impl FullSyncGrant {
    /// Ask `confirmer` for permission to truncate every table in `inventory`
    /// on `target`. Returns `None` if the operator declined.
    pub fn request(
        confirmer: &dyn FullSyncConfirmer,
        inventory: &TableInventory,
        target: &str,
    ) -> Result<Option<FullSyncGrant>> {
        if confirmer.confirm(inventory, target)? {
            tracing::warn!(
                "Full sync confirmed: {} table(s) on {} will be truncated",
                inventory.len(),
                target
            );
            Ok(Some(FullSyncGrant { _confirmed: () }))
        } else {
            tracing::info!("Full sync declined; target left untouched");
            Ok(None)
        }
    }
}

/// Something that can answer "truncate these tables?".
pub trait FullSyncConfirmer {
    fn confirm(&self, inventory: &TableInventory, target: &str) -> Result<bool>;
}

/// Interactive terminal prompt. Defaults to "no".
pub struct PromptConfirmer;

impl FullSyncConfirmer for PromptConfirmer {
    fn confirm(&self, inventory: &TableInventory, target: &str) -> Result<bool> {
        println!();
        println!("Full sync will TRUNCATE the following tables on {}:", target);
        for table in inventory {
            println!("  - {}", table.target_name());
        }
        println!("and copy them again from the source.");
        println!();

        let confirmed = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt("Truncate and reload these tables?")
            .default(false)
            .interact()?;
        Ok(confirmed)
    }
}

/// Non-interactive confirmation given on the command line (`--yes`).
pub struct AssumeYes;

impl FullSyncConfirmer for AssumeYes {
    fn confirm(&self, _inventory: &TableInventory, target: &str) -> Result<bool> {
        tracing::info!("Full sync of {} confirmed with --yes", target);
        Ok(true)
    }
}
