use serde_json::json;

use super::{
    AssetRow, AtomicAssetsHandler, BalanceRow, CollectionRow, ConfigRow, OfferRow, OfferState,
    SchemaRow, TemplateRow, HANDLER_NAME, TABLE_ASSETS, TABLE_BALANCES, TABLE_COLLECTIONS,
    TABLE_CONFIG, TABLE_OFFERS, TABLE_SCHEMAS, TABLE_TEMPLATES,
};
use crate::{
    db::{CmpOp, Condition, ContractDbTransaction, DbValue},
    db_row,
    error::FillerError,
    handlers::DeltaCtx,
};
use atomic_common::chain::Asset;

impl AtomicAssetsHandler {
    pub(super) async fn on_collections_row(
        &mut self,
        db: &mut ContractDbTransaction,
        ctx: &DeltaCtx<'_>,
    ) -> Result<(), FillerError> {
        if !ctx.delta.present {
            // collections are never removed from chain state
            return Ok(());
        }
        let row: CollectionRow = ctx.row(HANDLER_NAME, "collections_row")?;

        let condition = Condition::eq("contract", self.contract()).and(
            "collection_name",
            CmpOp::Eq,
            row.collection_name.as_str(),
        );
        let set = db_row! {
            "author" => row.author.as_str(),
            "allow_notify" => row.allow_notify,
            "authorized_accounts" => json!(row.authorized_accounts),
            "notify_accounts" => json!(row.notify_accounts),
            "market_fee" => DbValue::Float(row.market_fee),
        };

        let updated = db
            .update(
                TABLE_COLLECTIONS,
                &set,
                &condition,
                &["contract", "collection_name"],
            )
            .await?;
        if updated == 0 {
            // row appeared without a matching createcol (history replay)
            let mut insert = set;
            insert.insert("contract".to_string(), self.contract().into());
            insert.insert(
                "collection_name".to_string(),
                row.collection_name.as_str().into(),
            );
            insert.insert("data".to_string(), DbValue::Json(json!({})));
            insert.insert("created_at_block".to_string(), ctx.block.block_num.into());
            insert.insert(
                "created_at_time".to_string(),
                ctx.block.timestamp.as_str().into(),
            );
            db.insert(
                TABLE_COLLECTIONS,
                &[insert],
                &["contract", "collection_name"],
            )
            .await?;
        }
        Ok(())
    }

    pub(super) async fn on_schemas_row(
        &mut self,
        db: &mut ContractDbTransaction,
        ctx: &DeltaCtx<'_>,
    ) -> Result<(), FillerError> {
        if !ctx.delta.present {
            return Ok(());
        }
        let row: SchemaRow = ctx.row(HANDLER_NAME, "schemas_row")?;
        let collection = ctx.delta.scope.to_string();

        let condition = Condition::eq("contract", self.contract())
            .and("collection_name", CmpOp::Eq, collection.as_str())
            .and("schema_name", CmpOp::Eq, row.schema_name.as_str());
        let updated = db
            .update(
                TABLE_SCHEMAS,
                &db_row! { "format" => row.format.clone() },
                &condition,
                &["contract", "collection_name", "schema_name"],
            )
            .await?;
        if updated == 0 {
            db.insert(
                TABLE_SCHEMAS,
                &[db_row! {
                    "contract" => self.contract(),
                    "collection_name" => collection.as_str(),
                    "schema_name" => row.schema_name.as_str(),
                    "format" => row.format,
                    "created_at_block" => ctx.block.block_num,
                    "created_at_time" => ctx.block.timestamp.as_str(),
                }],
                &["contract", "collection_name", "schema_name"],
            )
            .await?;
        }
        Ok(())
    }

    pub(super) async fn on_templates_row(
        &mut self,
        db: &mut ContractDbTransaction,
        ctx: &DeltaCtx<'_>,
    ) -> Result<(), FillerError> {
        if !ctx.delta.present {
            return Ok(());
        }
        let row: TemplateRow = ctx.row(HANDLER_NAME, "templates_row")?;
        let collection = ctx.delta.scope.to_string();

        let condition = Condition::eq("contract", self.contract()).and(
            "template_id",
            CmpOp::Eq,
            row.template_id,
        );
        let set = db_row! {
            "schema_name" => row.schema_name.as_str(),
            "transferable" => row.transferable,
            "burnable" => row.burnable,
            "max_supply" => row.max_supply,
            "issued_supply" => row.issued_supply,
        };

        let updated = db
            .update(TABLE_TEMPLATES, &set, &condition, &["contract", "template_id"])
            .await?;
        if updated == 0 {
            let mut insert = set;
            insert.insert("contract".to_string(), self.contract().into());
            insert.insert("template_id".to_string(), row.template_id.into());
            insert.insert("collection_name".to_string(), collection.as_str().into());
            insert.insert("immutable_data".to_string(), DbValue::Json(json!({})));
            insert.insert("created_at_block".to_string(), ctx.block.block_num.into());
            insert.insert(
                "created_at_time".to_string(),
                ctx.block.timestamp.as_str().into(),
            );
            db.insert(TABLE_TEMPLATES, &[insert], &["contract", "template_id"])
                .await?;
        }
        Ok(())
    }

    pub(super) async fn on_assets_row(
        &mut self,
        db: &mut ContractDbTransaction,
        ctx: &DeltaCtx<'_>,
    ) -> Result<(), FillerError> {
        if !ctx.delta.present {
            // the row leaves its old owner scope on transfer or burn;
            // ownership is tracked through the log actions
            return Ok(());
        }
        let row: AssetRow = ctx.row(HANDLER_NAME, "assets_row")?;
        let owner = ctx.delta.scope.to_string();

        let condition = Condition::eq("contract", self.contract()).and(
            "asset_id",
            CmpOp::Eq,
            row.asset_id,
        );
        let existing = db.select(TABLE_ASSETS, &condition, &[], Some(1)).await?;
        if existing.is_empty() {
            db.insert(
                TABLE_ASSETS,
                &[db_row! {
                    "contract" => self.contract(),
                    "asset_id" => row.asset_id,
                    "collection_name" => row.collection_name.as_str(),
                    "schema_name" => row.schema_name.as_str(),
                    "template_id" => if row.template_id > 0 {
                        DbValue::Int(row.template_id)
                    } else {
                        DbValue::Null
                    },
                    "owner" => owner.as_str(),
                    "immutable_data" => json!({}),
                    "mutable_data" => json!({}),
                    "burned_by_account" => DbValue::Null,
                    "burned_at_block" => DbValue::Null,
                    "burned_at_time" => DbValue::Null,
                    "transferred_at_block" => ctx.block.block_num,
                    "transferred_at_time" => ctx.block.timestamp.as_str(),
                    "updated_at_block" => ctx.block.block_num,
                    "updated_at_time" => ctx.block.timestamp.as_str(),
                    "minted_at_block" => ctx.block.block_num,
                    "minted_at_time" => ctx.block.timestamp.as_str(),
                }],
                &["contract", "asset_id"],
            )
            .await?;
        } else {
            db.update(
                TABLE_ASSETS,
                &db_row! {
                    "owner" => owner.as_str(),
                    "updated_at_block" => ctx.block.block_num,
                    "updated_at_time" => ctx.block.timestamp.as_str(),
                },
                &condition,
                &["contract", "asset_id"],
            )
            .await?;
        }
        Ok(())
    }

    pub(super) async fn on_offers_row(
        &mut self,
        db: &mut ContractDbTransaction,
        ctx: &DeltaCtx<'_>,
    ) -> Result<(), FillerError> {
        if !ctx.delta.present {
            // deleted without a log action in this block means the offer
            // ended invisibly; decided after the block's writes landed
            self.queue_offer_check(ctx.delta.primary_key);
            return Ok(());
        }

        let row: OfferRow = ctx.row(HANDLER_NAME, "offers_row")?;
        let condition = Condition::eq("contract", self.contract()).and(
            "offer_id",
            CmpOp::Eq,
            row.offer_id,
        );
        let existing = db.select(TABLE_OFFERS, &condition, &[], Some(1)).await?;
        if existing.is_empty() {
            db.insert(
                TABLE_OFFERS,
                &[db_row! {
                    "contract" => self.contract(),
                    "offer_id" => row.offer_id,
                    "sender" => row.sender.as_str(),
                    "recipient" => row.recipient.as_str(),
                    "memo" => row.memo.as_str(),
                    "state" => OfferState::Pending.as_i64(),
                    "updated_at_block" => ctx.block.block_num,
                    "updated_at_time" => ctx.block.timestamp.as_str(),
                    "created_at_block" => ctx.block.block_num,
                    "created_at_time" => ctx.block.timestamp.as_str(),
                }],
                &["contract", "offer_id"],
            )
            .await?;
        }
        Ok(())
    }

    pub(super) async fn on_balances_row(
        &mut self,
        db: &mut ContractDbTransaction,
        ctx: &DeltaCtx<'_>,
    ) -> Result<(), FillerError> {
        let owner = if ctx.delta.present {
            let row: BalanceRow = ctx.row(HANDLER_NAME, "balances_row")?;
            let condition = Condition::eq("contract", self.contract()).and(
                "owner",
                CmpOp::Eq,
                row.owner.as_str(),
            );
            db.delete(TABLE_BALANCES, &condition).await?;

            let mut rows = Vec::with_capacity(row.quantities.len());
            for quantity in &row.quantities {
                let parsed: Asset = quantity.parse().map_err(|e| {
                    FillerError::handler(
                        HANDLER_NAME,
                        "balances_row",
                        format!("bad quantity: {:?}", e),
                    )
                })?;
                rows.push(db_row! {
                    "contract" => self.contract(),
                    "owner" => row.owner.as_str(),
                    "token_symbol" => parsed.symbol.code.to_string(),
                    "amount" => parsed.amount,
                    "updated_at_block" => ctx.block.block_num,
                    "updated_at_time" => ctx.block.timestamp.as_str(),
                });
            }
            if !rows.is_empty() {
                db.insert(TABLE_BALANCES, &rows, &["contract", "owner", "token_symbol"])
                    .await?;
            }
            row.owner
        } else {
            let owner = ctx.delta.payer.to_string();
            db.delete(
                TABLE_BALANCES,
                &Condition::eq("contract", self.contract()).and(
                    "owner",
                    CmpOp::Eq,
                    owner.as_str(),
                ),
            )
            .await?;
            owner
        };

        log::trace!("Balance row for {} applied", owner);
        Ok(())
    }

    pub(super) async fn on_config_row(
        &mut self,
        db: &mut ContractDbTransaction,
        ctx: &DeltaCtx<'_>,
    ) -> Result<(), FillerError> {
        if !ctx.delta.present {
            return Ok(());
        }
        let row: ConfigRow = ctx.row(HANDLER_NAME, "config_row")?;
        let tokens: Vec<_> = row
            .supported_tokens
            .iter()
            .map(|t| json!({"token_contract": t.token_contract, "token_symbol": t.token_symbol}))
            .collect();

        db.update(
            TABLE_CONFIG,
            &db_row! {
                "version" => row.version,
                "collection_format" => row.collection_format,
                "supported_tokens" => json!(tokens),
            },
            &Condition::eq("contract", self.contract()),
            &["contract"],
        )
        .await?;
        Ok(())
    }
}
