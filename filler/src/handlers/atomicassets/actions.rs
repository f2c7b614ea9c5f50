use serde_json::{json, Value};

use super::{
    attribute_map_to_object, AtomicAssetsHandler, CollectionAccount, CollectionName,
    CreateCollection, CreateSchema, ExtendSchema, LockTemplate, LogBackAsset, LogBurnAsset,
    LogMint, LogNewOffer, LogNewTemplate, LogSetData, LogTransfer, OfferId, OfferState,
    SetCollectionData, SetMarketFee, HANDLER_NAME, TABLE_ASSETS, TABLE_BACKED_TOKENS,
    TABLE_COLLECTIONS, TABLE_LOGS, TABLE_OFFERS, TABLE_OFFERS_ASSETS, TABLE_SCHEMAS,
    TABLE_TEMPLATES, TABLE_TRANSFERS, TABLE_TRANSFERS_ASSETS,
};
use crate::{
    db::{CmpOp, Condition, ContractDbTransaction, DbValue},
    db_row,
    error::FillerError,
    handlers::{write_log, ActionCtx},
    notification::{actions as notify, topics},
};
use atomic_common::chain::Asset;

impl AtomicAssetsHandler {
    async fn log(
        &self,
        db: &mut ContractDbTransaction,
        ctx: &ActionCtx<'_>,
        name: &str,
        relation_name: &str,
        relation_id: &str,
        data: Value,
    ) -> Result<(), FillerError> {
        if !self.store_logs() {
            return Ok(());
        }
        write_log(
            db,
            TABLE_LOGS,
            &self.contract(),
            name,
            relation_name,
            relation_id,
            data,
            ctx,
        )
        .await
    }

    pub(super) async fn on_create_collection(
        &mut self,
        db: &mut ContractDbTransaction,
        ctx: &ActionCtx<'_>,
    ) -> Result<(), FillerError> {
        let payload: CreateCollection = ctx.payload(HANDLER_NAME, "createcol")?;
        let data = attribute_map_to_object(&payload.data);

        let row = db_row! {
            "contract" => self.contract(),
            "collection_name" => payload.collection_name.as_str(),
            "author" => payload.author.as_str(),
            "allow_notify" => payload.allow_notify,
            "authorized_accounts" => json!(payload.authorized_accounts),
            "notify_accounts" => json!(payload.notify_accounts),
            "market_fee" => DbValue::Float(payload.market_fee),
            "data" => data.clone(),
            "created_at_block" => ctx.block.block_num,
            "created_at_time" => ctx.block.timestamp.as_str(),
        };
        db.replace(TABLE_COLLECTIONS, &row, &["contract", "collection_name"])
            .await?;

        self.log(
            db,
            ctx,
            "createcol",
            "collection",
            &payload.collection_name,
            json!({"author": payload.author}),
        )
        .await?;
        self.notify(
            db,
            ctx,
            topics::COLLECTIONS,
            notify::CREATE,
            json!({"collection_name": payload.collection_name, "author": payload.author, "data": data}),
        );
        Ok(())
    }

    pub(super) async fn on_set_collection_data(
        &mut self,
        db: &mut ContractDbTransaction,
        ctx: &ActionCtx<'_>,
    ) -> Result<(), FillerError> {
        let payload: SetCollectionData = ctx.payload(HANDLER_NAME, "setcoldata")?;
        let data = attribute_map_to_object(&payload.data);

        db.update(
            TABLE_COLLECTIONS,
            &db_row! { "data" => data.clone() },
            &self.collection_condition(&payload.collection_name),
            &["contract", "collection_name"],
        )
        .await?;

        self.log(
            db,
            ctx,
            "setcoldata",
            "collection",
            &payload.collection_name,
            json!({"data": data.clone()}),
        )
        .await?;
        self.notify(
            db,
            ctx,
            topics::COLLECTIONS,
            notify::UPDATE,
            json!({"collection_name": payload.collection_name, "data": data}),
        );
        Ok(())
    }

    fn collection_condition(&self, collection_name: &str) -> Condition {
        Condition::eq("contract", self.contract()).and(
            "collection_name",
            CmpOp::Eq,
            collection_name,
        )
    }

    async fn modify_collection_list(
        &mut self,
        db: &mut ContractDbTransaction,
        collection_name: &str,
        column: &str,
        account: &str,
        add: bool,
    ) -> Result<(), FillerError> {
        let condition = self.collection_condition(collection_name);
        let rows = db.select(TABLE_COLLECTIONS, &condition, &[], Some(1)).await?;
        let Some(row) = rows.first() else {
            return Err(FillerError::handler(
                HANDLER_NAME,
                "collection_list",
                format!("collection '{}' does not exist", collection_name),
            ));
        };

        let mut accounts: Vec<String> = match row.get(column) {
            Some(DbValue::Json(value)) => {
                serde_json::from_value(value.clone()).unwrap_or_default()
            }
            _ => Vec::new(),
        };

        if add {
            if !accounts.iter().any(|a| a == account) {
                accounts.push(account.to_string());
            }
        } else {
            accounts.retain(|a| a != account);
        }

        db.update(
            TABLE_COLLECTIONS,
            &db_row! { column => json!(accounts) },
            &condition,
            &["contract", "collection_name"],
        )
        .await?;
        Ok(())
    }

    pub(super) async fn on_collection_auth(
        &mut self,
        db: &mut ContractDbTransaction,
        ctx: &ActionCtx<'_>,
        add: bool,
    ) -> Result<(), FillerError> {
        let payload: CollectionAccount = ctx.payload(HANDLER_NAME, "collection_auth")?;
        self.modify_collection_list(
            db,
            &payload.collection_name,
            "authorized_accounts",
            &payload.account,
            add,
        )
        .await?;
        self.notify(
            db,
            ctx,
            topics::COLLECTIONS,
            notify::UPDATE,
            json!({"collection_name": payload.collection_name}),
        );
        Ok(())
    }

    pub(super) async fn on_collection_notify(
        &mut self,
        db: &mut ContractDbTransaction,
        ctx: &ActionCtx<'_>,
        add: bool,
    ) -> Result<(), FillerError> {
        let payload: CollectionAccount = ctx.payload(HANDLER_NAME, "collection_notify")?;
        self.modify_collection_list(
            db,
            &payload.collection_name,
            "notify_accounts",
            &payload.account,
            add,
        )
        .await
    }

    pub(super) async fn on_forbid_notify(
        &mut self,
        db: &mut ContractDbTransaction,
        ctx: &ActionCtx<'_>,
    ) -> Result<(), FillerError> {
        let payload: CollectionName = ctx.payload(HANDLER_NAME, "forbidnotify")?;
        db.update(
            TABLE_COLLECTIONS,
            &db_row! { "allow_notify" => false },
            &self.collection_condition(&payload.collection_name),
            &["contract", "collection_name"],
        )
        .await?;
        Ok(())
    }

    pub(super) async fn on_set_market_fee(
        &mut self,
        db: &mut ContractDbTransaction,
        ctx: &ActionCtx<'_>,
    ) -> Result<(), FillerError> {
        let payload: SetMarketFee = ctx.payload(HANDLER_NAME, "setmarketfee")?;
        db.update(
            TABLE_COLLECTIONS,
            &db_row! { "market_fee" => DbValue::Float(payload.market_fee) },
            &self.collection_condition(&payload.collection_name),
            &["contract", "collection_name"],
        )
        .await?;
        Ok(())
    }

    pub(super) async fn on_create_schema(
        &mut self,
        db: &mut ContractDbTransaction,
        ctx: &ActionCtx<'_>,
    ) -> Result<(), FillerError> {
        let payload: CreateSchema = ctx.payload(HANDLER_NAME, "createschema")?;
        let format: Vec<Value> = payload
            .schema_format
            .iter()
            .map(|f| json!({"name": f.name, "type": f.type_name}))
            .collect();

        let row = db_row! {
            "contract" => self.contract(),
            "collection_name" => payload.collection_name.as_str(),
            "schema_name" => payload.schema_name.as_str(),
            "format" => json!(format),
            "created_at_block" => ctx.block.block_num,
            "created_at_time" => ctx.block.timestamp.as_str(),
        };
        db.replace(
            TABLE_SCHEMAS,
            &row,
            &["contract", "collection_name", "schema_name"],
        )
        .await?;

        self.notify(
            db,
            ctx,
            topics::SCHEMAS,
            notify::CREATE,
            json!({
                "collection_name": payload.collection_name,
                "schema_name": payload.schema_name,
            }),
        );
        Ok(())
    }

    pub(super) async fn on_extend_schema(
        &mut self,
        db: &mut ContractDbTransaction,
        ctx: &ActionCtx<'_>,
    ) -> Result<(), FillerError> {
        let payload: ExtendSchema = ctx.payload(HANDLER_NAME, "extendschema")?;
        let condition = Condition::eq("contract", self.contract())
            .and("collection_name", CmpOp::Eq, payload.collection_name.as_str())
            .and("schema_name", CmpOp::Eq, payload.schema_name.as_str());

        let rows = db.select(TABLE_SCHEMAS, &condition, &[], Some(1)).await?;
        let mut format: Vec<Value> = rows
            .first()
            .and_then(|row| row.get("format"))
            .and_then(|value| match value {
                DbValue::Json(json) => serde_json::from_value(json.clone()).ok(),
                _ => None,
            })
            .unwrap_or_default();

        format.extend(
            payload
                .schema_format_extension
                .iter()
                .map(|f| json!({"name": f.name, "type": f.type_name})),
        );

        db.update(
            TABLE_SCHEMAS,
            &db_row! { "format" => json!(format) },
            &condition,
            &["contract", "collection_name", "schema_name"],
        )
        .await?;

        self.notify(
            db,
            ctx,
            topics::SCHEMAS,
            notify::UPDATE,
            json!({
                "collection_name": payload.collection_name,
                "schema_name": payload.schema_name,
            }),
        );
        Ok(())
    }

    pub(super) async fn on_new_template(
        &mut self,
        db: &mut ContractDbTransaction,
        ctx: &ActionCtx<'_>,
    ) -> Result<(), FillerError> {
        let payload: LogNewTemplate = ctx.payload(HANDLER_NAME, "lognewtempl")?;

        let row = db_row! {
            "contract" => self.contract(),
            "template_id" => payload.template_id,
            "collection_name" => payload.collection_name.as_str(),
            "schema_name" => payload.schema_name.as_str(),
            "transferable" => payload.transferable,
            "burnable" => payload.burnable,
            "max_supply" => payload.max_supply,
            "issued_supply" => 0i64,
            "immutable_data" => attribute_map_to_object(&payload.immutable_data),
            "created_at_block" => ctx.block.block_num,
            "created_at_time" => ctx.block.timestamp.as_str(),
        };
        db.replace(TABLE_TEMPLATES, &row, &["contract", "template_id"])
            .await?;

        self.notify(
            db,
            ctx,
            topics::TEMPLATES,
            notify::CREATE,
            json!({
                "collection_name": payload.collection_name,
                "template_id": payload.template_id,
            }),
        );
        Ok(())
    }

    pub(super) async fn on_lock_template(
        &mut self,
        db: &mut ContractDbTransaction,
        ctx: &ActionCtx<'_>,
    ) -> Result<(), FillerError> {
        let payload: LockTemplate = ctx.payload(HANDLER_NAME, "locktemplate")?;
        let condition = Condition::eq("contract", self.contract())
            .and("template_id", CmpOp::Eq, payload.template_id);

        let rows = db.select(TABLE_TEMPLATES, &condition, &[], Some(1)).await?;
        if let Some(issued) = rows
            .first()
            .and_then(|row| row.get("issued_supply"))
            .and_then(|v| v.as_i64())
        {
            db.update(
                TABLE_TEMPLATES,
                &db_row! { "max_supply" => issued },
                &condition,
                &["contract", "template_id"],
            )
            .await?;
        }
        Ok(())
    }

    pub(super) async fn on_mint(
        &mut self,
        db: &mut ContractDbTransaction,
        ctx: &ActionCtx<'_>,
    ) -> Result<(), FillerError> {
        let payload: LogMint = ctx.payload(HANDLER_NAME, "logmint")?;
        let immutable = attribute_map_to_object(&payload.immutable_data);
        let mutable = attribute_map_to_object(&payload.mutable_data);

        let row = db_row! {
            "contract" => self.contract(),
            "asset_id" => payload.asset_id,
            "collection_name" => payload.collection_name.as_str(),
            "schema_name" => payload.schema_name.as_str(),
            "template_id" => if payload.template_id > 0 {
                DbValue::Int(payload.template_id)
            } else {
                DbValue::Null
            },
            "owner" => payload.new_asset_owner.as_str(),
            "immutable_data" => immutable.clone(),
            "mutable_data" => mutable,
            "burned_by_account" => DbValue::Null,
            "burned_at_block" => DbValue::Null,
            "burned_at_time" => DbValue::Null,
            "transferred_at_block" => ctx.block.block_num,
            "transferred_at_time" => ctx.block.timestamp.as_str(),
            "updated_at_block" => ctx.block.block_num,
            "updated_at_time" => ctx.block.timestamp.as_str(),
            "minted_at_block" => ctx.block.block_num,
            "minted_at_time" => ctx.block.timestamp.as_str(),
        };
        db.replace(TABLE_ASSETS, &row, &["contract", "asset_id"]).await?;

        if payload.template_id > 0 {
            let condition = Condition::eq("contract", self.contract())
                .and("template_id", CmpOp::Eq, payload.template_id);
            let rows = db.select(TABLE_TEMPLATES, &condition, &[], Some(1)).await?;
            if let Some(issued) = rows
                .first()
                .and_then(|row| row.get("issued_supply"))
                .and_then(|v| v.as_i64())
            {
                db.update(
                    TABLE_TEMPLATES,
                    &db_row! { "issued_supply" => issued + 1 },
                    &condition,
                    &["contract", "template_id"],
                )
                .await?;
            }
        }

        let asset_id = payload.asset_id.to_string();
        self.log(
            db,
            ctx,
            "logmint",
            "asset",
            &asset_id,
            json!({
                "new_asset_owner": payload.new_asset_owner,
                "collection_name": payload.collection_name,
                "template_id": payload.template_id,
            }),
        )
        .await?;
        self.notify(
            db,
            ctx,
            topics::ASSETS,
            notify::MINT,
            json!({
                "asset_id": asset_id,
                "owner": payload.new_asset_owner,
                "collection_name": payload.collection_name,
                "immutable_data": immutable,
            }),
        );
        Ok(())
    }

    pub(super) async fn on_set_data(
        &mut self,
        db: &mut ContractDbTransaction,
        ctx: &ActionCtx<'_>,
    ) -> Result<(), FillerError> {
        let payload: LogSetData = ctx.payload(HANDLER_NAME, "logsetdata")?;
        let data = attribute_map_to_object(&payload.new_data);

        db.update(
            TABLE_ASSETS,
            &db_row! {
                "mutable_data" => data.clone(),
                "updated_at_block" => ctx.block.block_num,
                "updated_at_time" => ctx.block.timestamp.as_str(),
            },
            &self.asset_condition(payload.asset_id),
            &["contract", "asset_id"],
        )
        .await?;

        let asset_id = payload.asset_id.to_string();
        self.log(db, ctx, "logsetdata", "asset", &asset_id, json!({"new_data": data.clone()}))
            .await?;
        self.notify(
            db,
            ctx,
            topics::ASSETS,
            notify::UPDATE,
            json!({"asset_id": asset_id, "owner": payload.asset_owner, "mutable_data": data}),
        );
        Ok(())
    }

    fn asset_condition(&self, asset_id: u64) -> Condition {
        Condition::eq("contract", self.contract()).and("asset_id", CmpOp::Eq, asset_id)
    }

    pub(super) async fn on_burn(
        &mut self,
        db: &mut ContractDbTransaction,
        ctx: &ActionCtx<'_>,
    ) -> Result<(), FillerError> {
        let payload: LogBurnAsset = ctx.payload(HANDLER_NAME, "logburnasset")?;

        db.update(
            TABLE_ASSETS,
            &db_row! {
                "owner" => DbValue::Null,
                "burned_by_account" => payload.asset_owner.as_str(),
                "burned_at_block" => ctx.block.block_num,
                "burned_at_time" => ctx.block.timestamp.as_str(),
                "updated_at_block" => ctx.block.block_num,
                "updated_at_time" => ctx.block.timestamp.as_str(),
            },
            &self.asset_condition(payload.asset_id),
            &["contract", "asset_id"],
        )
        .await?;

        let asset_id = payload.asset_id.to_string();
        self.log(
            db,
            ctx,
            "logburnasset",
            "asset",
            &asset_id,
            json!({"asset_owner": payload.asset_owner, "collection_name": payload.collection_name}),
        )
        .await?;
        self.notify(
            db,
            ctx,
            topics::ASSETS,
            notify::BURN,
            json!({"asset_id": asset_id, "burned_by": payload.asset_owner}),
        );
        Ok(())
    }

    pub(super) async fn on_back_asset(
        &mut self,
        db: &mut ContractDbTransaction,
        ctx: &ActionCtx<'_>,
    ) -> Result<(), FillerError> {
        let payload: LogBackAsset = ctx.payload(HANDLER_NAME, "logbackasset")?;
        let quantity: Asset = payload.backed_token.parse().map_err(|e| {
            FillerError::handler(HANDLER_NAME, "logbackasset", format!("bad quantity: {:?}", e))
        })?;

        let symbol = quantity.symbol.code.to_string();
        let condition = self
            .asset_condition(payload.asset_id)
            .and("token_symbol", CmpOp::Eq, symbol.as_str());
        let rows = db.select(TABLE_BACKED_TOKENS, &condition, &[], Some(1)).await?;
        let previous = rows
            .first()
            .and_then(|row| row.get("amount"))
            .and_then(|v| v.as_i64())
            .unwrap_or(0);

        let row = db_row! {
            "contract" => self.contract(),
            "asset_id" => payload.asset_id,
            "token_symbol" => symbol.as_str(),
            "amount" => previous + quantity.amount,
            "updated_at_block" => ctx.block.block_num,
            "updated_at_time" => ctx.block.timestamp.as_str(),
        };
        db.replace(
            TABLE_BACKED_TOKENS,
            &row,
            &["contract", "asset_id", "token_symbol"],
        )
        .await?;

        let asset_id = payload.asset_id.to_string();
        self.log(
            db,
            ctx,
            "logbackasset",
            "asset",
            &asset_id,
            json!({"backed_token": payload.backed_token}),
        )
        .await?;
        self.notify(
            db,
            ctx,
            topics::ASSETS,
            notify::BACK,
            json!({"asset_id": asset_id, "backed_token": payload.backed_token}),
        );
        Ok(())
    }

    pub(super) async fn on_transfer(
        &mut self,
        db: &mut ContractDbTransaction,
        ctx: &ActionCtx<'_>,
    ) -> Result<(), FillerError> {
        let payload: LogTransfer = ctx.payload(HANDLER_NAME, "logtransfer")?;

        for asset_id in &payload.asset_ids {
            db.update(
                TABLE_ASSETS,
                &db_row! {
                    "owner" => payload.recipient.as_str(),
                    "transferred_at_block" => ctx.block.block_num,
                    "transferred_at_time" => ctx.block.timestamp.as_str(),
                    "updated_at_block" => ctx.block.block_num,
                    "updated_at_time" => ctx.block.timestamp.as_str(),
                },
                &self.asset_condition(*asset_id),
                &["contract", "asset_id"],
            )
            .await?;

            let asset_id = asset_id.to_string();
            self.log(
                db,
                ctx,
                "logtransfer",
                "asset",
                &asset_id,
                json!({"from": payload.sender, "to": payload.recipient}),
            )
            .await?;
            self.notify(
                db,
                ctx,
                topics::ASSETS,
                notify::UPDATE,
                json!({"asset_id": asset_id, "owner": payload.recipient}),
            );
        }

        if self.store_transfers() {
            let transfer_id = ctx.trace.global_sequence;
            db.insert(
                TABLE_TRANSFERS,
                &[db_row! {
                    "contract" => self.contract(),
                    "transfer_id" => transfer_id,
                    "sender" => payload.sender.as_str(),
                    "recipient" => payload.recipient.as_str(),
                    "memo" => payload.memo.as_str(),
                    "txid" => hex::decode(&ctx.tx.id).unwrap_or_default(),
                    "created_at_block" => ctx.block.block_num,
                    "created_at_time" => ctx.block.timestamp.as_str(),
                }],
                &["contract", "transfer_id"],
            )
            .await?;

            let asset_rows: Vec<_> = payload
                .asset_ids
                .iter()
                .map(|asset_id| {
                    db_row! {
                        "contract" => self.contract(),
                        "transfer_id" => transfer_id,
                        "asset_id" => *asset_id,
                    }
                })
                .collect();
            db.insert(
                TABLE_TRANSFERS_ASSETS,
                &asset_rows,
                &["contract", "transfer_id", "asset_id"],
            )
            .await?;

            self.notify(
                db,
                ctx,
                topics::TRANSFERS,
                notify::CREATE,
                json!({
                    "transfer_id": transfer_id.to_string(),
                    "from": payload.sender,
                    "to": payload.recipient,
                    "asset_ids": payload.asset_ids.iter().map(u64::to_string).collect::<Vec<_>>(),
                }),
            );
        }

        Ok(())
    }

    pub(super) async fn on_new_offer(
        &mut self,
        db: &mut ContractDbTransaction,
        ctx: &ActionCtx<'_>,
    ) -> Result<(), FillerError> {
        let payload: LogNewOffer = ctx.payload(HANDLER_NAME, "lognewoffer")?;

        db.replace(
            TABLE_OFFERS,
            &db_row! {
                "contract" => self.contract(),
                "offer_id" => payload.offer_id,
                "sender" => payload.sender.as_str(),
                "recipient" => payload.recipient.as_str(),
                "memo" => payload.memo.as_str(),
                "state" => OfferState::Pending.as_i64(),
                "updated_at_block" => ctx.block.block_num,
                "updated_at_time" => ctx.block.timestamp.as_str(),
                "created_at_block" => ctx.block.block_num,
                "created_at_time" => ctx.block.timestamp.as_str(),
            },
            &["contract", "offer_id"],
        )
        .await?;

        let mut asset_rows = Vec::new();
        for (owner, ids) in [
            (&payload.sender, &payload.sender_asset_ids),
            (&payload.recipient, &payload.recipient_asset_ids),
        ] {
            for asset_id in ids {
                asset_rows.push(db_row! {
                    "contract" => self.contract(),
                    "offer_id" => payload.offer_id,
                    "owner" => owner.as_str(),
                    "asset_id" => *asset_id,
                });
            }
        }
        let keys = ["contract", "offer_id", "asset_id"];
        db.delete(
            TABLE_OFFERS_ASSETS,
            &Condition::eq("contract", self.contract()).and(
                "offer_id",
                CmpOp::Eq,
                payload.offer_id,
            ),
        )
        .await?;
        db.insert(TABLE_OFFERS_ASSETS, &asset_rows, &keys).await?;

        self.notify(
            db,
            ctx,
            topics::OFFERS,
            notify::CREATE,
            json!({
                "offer_id": payload.offer_id.to_string(),
                "sender": payload.sender,
                "recipient": payload.recipient,
            }),
        );
        Ok(())
    }

    pub(super) async fn on_offer_state(
        &mut self,
        db: &mut ContractDbTransaction,
        ctx: &ActionCtx<'_>,
        state: OfferState,
    ) -> Result<(), FillerError> {
        let payload: OfferId = ctx.payload(HANDLER_NAME, "offer_state")?;

        db.update(
            TABLE_OFFERS,
            &db_row! {
                "state" => state.as_i64(),
                "updated_at_block" => ctx.block.block_num,
                "updated_at_time" => ctx.block.timestamp.as_str(),
            },
            &Condition::eq("contract", self.contract()).and(
                "offer_id",
                CmpOp::Eq,
                payload.offer_id,
            ),
            &["contract", "offer_id"],
        )
        .await?;

        self.notify(
            db,
            ctx,
            topics::OFFERS,
            notify::STATE_CHANGE,
            json!({"offer_id": payload.offer_id.to_string(), "state": state.as_i64()}),
        );
        Ok(())
    }
}
