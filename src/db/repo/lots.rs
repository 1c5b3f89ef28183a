//! Lot, disposal, and transfer persistence, grouped by calculation run.

use super::{decode_err, decode_msg, parse_datetime, parse_decimal, parse_uuid, Repository};
use crate::domain::{
    AcquisitionLot, AssetId, AssetSymbol, CostBasisMethod, LotDisposal, LotStatus, LotTransfer,
    LotTransferMetadata, TimeMs, TxId,
};
use sqlx::Row;
use uuid::Uuid;

fn method_to_str(method: CostBasisMethod) -> &'static str {
    match method {
        CostBasisMethod::Fifo => "fifo",
        CostBasisMethod::Lifo => "lifo",
        CostBasisMethod::AverageCost => "average-cost",
        CostBasisMethod::SpecificId => "specific-id",
    }
}

fn method_from_str(text: &str) -> Result<CostBasisMethod, sqlx::Error> {
    text.parse::<CostBasisMethod>().map_err(decode_msg)
}

fn lot_status_to_str(status: LotStatus) -> &'static str {
    match status {
        LotStatus::Open => "open",
        LotStatus::PartiallyDisposed => "partially_disposed",
        LotStatus::FullyDisposed => "fully_disposed",
    }
}

fn lot_status_from_str(text: &str) -> Result<LotStatus, sqlx::Error> {
    match text {
        "open" => Ok(LotStatus::Open),
        "partially_disposed" => Ok(LotStatus::PartiallyDisposed),
        "fully_disposed" => Ok(LotStatus::FullyDisposed),
        other => Err(decode_msg(format!("unknown lot status: {}", other))),
    }
}

fn row_to_lot(row: &sqlx::sqlite::SqliteRow) -> Result<AcquisitionLot, sqlx::Error> {
    Ok(AcquisitionLot {
        id: parse_uuid(&row.get::<String, _>("id"))?,
        calculation_id: parse_uuid(&row.get::<String, _>("calculation_id"))?,
        acquisition_transaction_id: TxId::new(row.get::<String, _>("acquisition_transaction_id")),
        asset_id: AssetId::new(row.get::<String, _>("asset_id")),
        asset_symbol: AssetSymbol::new(row.get::<String, _>("asset_symbol")),
        quantity: parse_decimal(&row.get::<String, _>("quantity"))?,
        cost_basis_per_unit: parse_decimal(&row.get::<String, _>("cost_basis_per_unit"))?,
        total_cost_basis: parse_decimal(&row.get::<String, _>("total_cost_basis"))?,
        acquisition_date: TimeMs::new(row.get::<i64, _>("acquisition_date_ms")),
        method: method_from_str(&row.get::<String, _>("method"))?,
        remaining_quantity: parse_decimal(&row.get::<String, _>("remaining_quantity"))?,
        status: lot_status_from_str(&row.get::<String, _>("status"))?,
        updated_at: parse_datetime(&row.get::<String, _>("updated_at"))?,
    })
}

fn row_to_disposal(row: &sqlx::sqlite::SqliteRow) -> Result<LotDisposal, sqlx::Error> {
    Ok(LotDisposal {
        lot_id: parse_uuid(&row.get::<String, _>("lot_id"))?,
        quantity_disposed: parse_decimal(&row.get::<String, _>("quantity_disposed"))?,
        cost_basis_per_unit: parse_decimal(&row.get::<String, _>("cost_basis_per_unit"))?,
        proceeds_per_unit: parse_decimal(&row.get::<String, _>("proceeds_per_unit"))?,
        transaction_id: TxId::new(row.get::<String, _>("transaction_id")),
        date: TimeMs::new(row.get::<i64, _>("date_ms")),
    })
}

fn row_to_transfer(row: &sqlx::sqlite::SqliteRow) -> Result<LotTransfer, sqlx::Error> {
    let metadata: Option<LotTransferMetadata> = row
        .get::<Option<String>, _>("metadata")
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(decode_err)?;

    Ok(LotTransfer {
        source_lot_id: parse_uuid(&row.get::<String, _>("source_lot_id"))?,
        quantity_transferred: parse_decimal(&row.get::<String, _>("quantity_transferred"))?,
        cost_basis_per_unit: parse_decimal(&row.get::<String, _>("cost_basis_per_unit"))?,
        link_id: parse_uuid(&row.get::<String, _>("link_id"))?,
        source_transaction_id: TxId::new(row.get::<String, _>("source_transaction_id")),
        target_transaction_id: TxId::new(row.get::<String, _>("target_transaction_id")),
        metadata,
        transfer_date: TimeMs::new(row.get::<i64, _>("transfer_date_ms")),
    })
}

impl Repository {
    /// Insert a calculation run's lots in one transaction.
    pub async fn insert_lots_batch(
        &self,
        lots: &[AcquisitionLot],
    ) -> Result<usize, sqlx::Error> {
        if lots.is_empty() {
            return Ok(0);
        }

        let mut db_tx = self.pool().begin().await?;
        for lot in lots {
            sqlx::query(
                r#"
                INSERT INTO acquisition_lots
                    (id, calculation_id, acquisition_transaction_id, asset_id, asset_symbol,
                     quantity, cost_basis_per_unit, total_cost_basis, acquisition_date_ms,
                     method, remaining_quantity, status, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(lot.id.to_string())
            .bind(lot.calculation_id.to_string())
            .bind(lot.acquisition_transaction_id.as_str())
            .bind(lot.asset_id.as_str())
            .bind(lot.asset_symbol.as_str())
            .bind(lot.quantity.to_canonical_string())
            .bind(lot.cost_basis_per_unit.to_canonical_string())
            .bind(lot.total_cost_basis.to_canonical_string())
            .bind(lot.acquisition_date.as_ms())
            .bind(method_to_str(lot.method))
            .bind(lot.remaining_quantity.to_canonical_string())
            .bind(lot_status_to_str(lot.status))
            .bind(lot.updated_at.to_rfc3339())
            .execute(&mut *db_tx)
            .await?;
        }
        db_tx.commit().await?;

        Ok(lots.len())
    }

    /// Persist updated remaining quantities and statuses.
    pub async fn update_lot_quantities(
        &self,
        lots: &[AcquisitionLot],
    ) -> Result<(), sqlx::Error> {
        if lots.is_empty() {
            return Ok(());
        }

        let mut db_tx = self.pool().begin().await?;
        for lot in lots {
            sqlx::query(
                r#"
                UPDATE acquisition_lots
                SET remaining_quantity = ?, status = ?, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(lot.remaining_quantity.to_canonical_string())
            .bind(lot_status_to_str(lot.status))
            .bind(lot.updated_at.to_rfc3339())
            .bind(lot.id.to_string())
            .execute(&mut *db_tx)
            .await?;
        }
        db_tx.commit().await?;

        Ok(())
    }

    /// Fetch all lots for a calculation run, oldest acquisition first.
    pub async fn fetch_lots_by_calculation(
        &self,
        calculation_id: Uuid,
    ) -> Result<Vec<AcquisitionLot>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM acquisition_lots
            WHERE calculation_id = ?
            ORDER BY acquisition_date_ms, id
            "#,
        )
        .bind(calculation_id.to_string())
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(row_to_lot).collect()
    }

    /// Insert a calculation run's disposals in one transaction.
    pub async fn insert_disposals_batch(
        &self,
        calculation_id: Uuid,
        disposals: &[LotDisposal],
    ) -> Result<usize, sqlx::Error> {
        if disposals.is_empty() {
            return Ok(0);
        }

        let mut db_tx = self.pool().begin().await?;
        for disposal in disposals {
            sqlx::query(
                r#"
                INSERT INTO lot_disposals
                    (calculation_id, lot_id, quantity_disposed, cost_basis_per_unit,
                     proceeds_per_unit, transaction_id, date_ms)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(calculation_id.to_string())
            .bind(disposal.lot_id.to_string())
            .bind(disposal.quantity_disposed.to_canonical_string())
            .bind(disposal.cost_basis_per_unit.to_canonical_string())
            .bind(disposal.proceeds_per_unit.to_canonical_string())
            .bind(disposal.transaction_id.as_str())
            .bind(disposal.date.as_ms())
            .execute(&mut *db_tx)
            .await?;
        }
        db_tx.commit().await?;

        Ok(disposals.len())
    }

    /// Fetch all disposals for a calculation run.
    pub async fn fetch_disposals_by_calculation(
        &self,
        calculation_id: Uuid,
    ) -> Result<Vec<LotDisposal>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT * FROM lot_disposals WHERE calculation_id = ? ORDER BY date_ms, id",
        )
        .bind(calculation_id.to_string())
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(row_to_disposal).collect()
    }

    /// Insert a calculation run's lot transfers in one transaction.
    pub async fn insert_transfers_batch(
        &self,
        calculation_id: Uuid,
        transfers: &[LotTransfer],
    ) -> Result<usize, sqlx::Error> {
        if transfers.is_empty() {
            return Ok(0);
        }

        let mut db_tx = self.pool().begin().await?;
        for transfer in transfers {
            let metadata = transfer
                .metadata
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(decode_err)?;

            sqlx::query(
                r#"
                INSERT INTO lot_transfers
                    (calculation_id, source_lot_id, quantity_transferred, cost_basis_per_unit,
                     link_id, source_transaction_id, target_transaction_id, metadata,
                     transfer_date_ms)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(calculation_id.to_string())
            .bind(transfer.source_lot_id.to_string())
            .bind(transfer.quantity_transferred.to_canonical_string())
            .bind(transfer.cost_basis_per_unit.to_canonical_string())
            .bind(transfer.link_id.to_string())
            .bind(transfer.source_transaction_id.as_str())
            .bind(transfer.target_transaction_id.as_str())
            .bind(metadata)
            .bind(transfer.transfer_date.as_ms())
            .execute(&mut *db_tx)
            .await?;
        }
        db_tx.commit().await?;

        Ok(transfers.len())
    }

    /// Fetch all lot transfers for a calculation run.
    pub async fn fetch_transfers_by_calculation(
        &self,
        calculation_id: Uuid,
    ) -> Result<Vec<LotTransfer>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT * FROM lot_transfers WHERE calculation_id = ? ORDER BY transfer_date_ms, id",
        )
        .bind(calculation_id.to_string())
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(row_to_transfer).collect()
    }
}
