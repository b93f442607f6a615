//! Recharge order lifecycle and reconciliation.
//!
//! An order is created PENDING, the user pays against a provider-hosted
//! handle, and the order is later reconciled: by the client polling
//! `sync_order` every few seconds for a bounded number of attempts, or
//! by the provider's asynchronous notify callback, whichever lands
//! first.
//!
//! Crediting is exactly-once per order, guarded twice:
//! 1. the order's own PENDING → PAID transition is a compare-and-set,
//!    so of two concurrent reconcilers only one wins and credits
//! 2. as defense in depth, the credit checks for an existing `recharge`
//!    ledger entry carrying the order id before inserting one
//!
//! Reconciliation never decrements a balance.

use std::collections::BTreeMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::{
    config::Config,
    db::DbPool,
    error::AppError,
    gateway::alipay::{self, AlipayClient},
    gateway::cert_cache::CertificateCache,
    gateway::wechat::{self, CallbackHeaders, WechatPayClient},
    models::balance::Tranche,
    models::ledger::LedgerKind,
    models::recharge_order::{
        CreateRechargeRequest, CreateRechargeResponse, OrderStatus, PaymentMethod, RechargeOrder,
        SyncRechargeResponse,
    },
    services::balance_service,
};

/// Largest accepted order, in whole CNY. Keeps the fen and coin
/// conversions far away from i64 overflow.
const MAX_ORDER_CNY: i64 = 1_000_000;

/// Ledger description for an order's recharge credit; doubles as the
/// dedupe key for the duplicate-credit check in `settle_paid_order`.
pub fn recharge_description(out_trade_no: &str) -> String {
    format!("recharge order {out_trade_no}")
}

fn validate_amount_cny(amount_cny: i64) -> Result<(), AppError> {
    if amount_cny <= 0 {
        return Err(AppError::Validation("Amount must be positive".to_string()));
    }
    if amount_cny > MAX_ORDER_CNY {
        return Err(AppError::Validation(format!(
            "Amount must not exceed {MAX_ORDER_CNY} CNY"
        )));
    }
    Ok(())
}

/// Resolve how many coins a paid order credits.
///
/// The stored `coins_amount` wins; orders that predate coin resolution
/// derive it from the CNY amount at the fixed exchange rate.
pub fn resolve_coins(coins_amount: i64, amount_fen: i64, coins_per_yuan: i64) -> i64 {
    if coins_amount > 0 {
        coins_amount
    } else {
        amount_fen / 100 * coins_per_yuan
    }
}

/// External-facing order id: R + UTC second timestamp + random suffix.
fn new_out_trade_no() -> String {
    format!(
        "R{}{}",
        chrono::Utc::now().format("%Y%m%d%H%M%S"),
        hex::encode(rand::random::<[u8; 4]>())
    )
}

/// Create a PENDING order and obtain the provider payment handle.
///
/// The order row is committed before the provider is contacted: a
/// provider failure leaves a PENDING order that will simply never be
/// paid, which is harmless.
pub async fn create_order(
    pool: &DbPool,
    config: &Config,
    certs: &Arc<CertificateCache>,
    user_id: Uuid,
    request: CreateRechargeRequest,
) -> Result<CreateRechargeResponse, AppError> {
    validate_amount_cny(request.amount_cny)?;

    let out_trade_no = new_out_trade_no();
    let amount_fen = request.amount_cny * 100;
    let coins_amount = request.amount_cny * config.coins_per_yuan;

    sqlx::query(
        r#"
        INSERT INTO recharge_orders (out_trade_no, user_id, amount_fen, coins_amount, payment_method)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(&out_trade_no)
    .bind(user_id)
    .bind(amount_fen)
    .bind(coins_amount)
    .bind(request.payment_method.as_str())
    .execute(pool)
    .await?;

    let subject = format!("Coin recharge {} CNY", request.amount_cny);
    let handle = match request.payment_method {
        PaymentMethod::Wechat => {
            let client = WechatPayClient::from_config(config, certs.clone())?;
            client
                .create_order(request.scene, &out_trade_no, amount_fen, &subject)
                .await?
        }
        PaymentMethod::Alipay => {
            let client = AlipayClient::from_config(config)?;
            client
                .create_order(request.scene, &out_trade_no, amount_fen, &subject)
                .await?
        }
    };

    tracing::info!(
        user = %user_id,
        order = %out_trade_no,
        amount_fen,
        coins_amount,
        method = request.payment_method.as_str(),
        "recharge order created"
    );

    Ok(CreateRechargeResponse {
        out_trade_no,
        amount_cny: request.amount_cny,
        coins_amount,
        handle,
    })
}

/// Reconcile one order against its provider.
///
/// Idempotent: a PAID order returns immediately; a PENDING order is
/// queried remotely, and only a remote paid status triggers the
/// compare-and-set credit path.
pub async fn sync_order(
    pool: &DbPool,
    config: &Config,
    certs: &Arc<CertificateCache>,
    user_id: Uuid,
    out_trade_no: &str,
) -> Result<SyncRechargeResponse, AppError> {
    let order = find_order_for_user(pool, user_id, out_trade_no).await?;

    if order.status == OrderStatus::Paid.as_str() {
        return Ok(SyncRechargeResponse {
            success: true,
            status: OrderStatus::Paid,
            remote_status: "PAID".to_string(),
        });
    }

    let method = PaymentMethod::parse(&order.payment_method)
        .ok_or_else(|| AppError::Validation("Unknown payment method on order".to_string()))?;

    let (remote_status, paid) = match method {
        PaymentMethod::Wechat => {
            let client = WechatPayClient::from_config(config, certs.clone())?;
            let state = client.query_order(out_trade_no).await?;
            let paid = wechat::is_paid_state(&state);
            (state, paid)
        }
        PaymentMethod::Alipay => {
            let client = AlipayClient::from_config(config)?;
            let status = client.query_order(out_trade_no).await?;
            let paid = alipay::is_paid_status(&status);
            (status, paid)
        }
    };

    if !paid {
        return Ok(SyncRechargeResponse {
            success: true,
            status: OrderStatus::Pending,
            remote_status,
        });
    }

    settle_paid_order(pool, config, &order).await?;

    Ok(SyncRechargeResponse {
        success: true,
        status: OrderStatus::Paid,
        remote_status,
    })
}

/// Apply a verified, decrypted WeChat payment notification.
pub async fn handle_wechat_notify(
    pool: &DbPool,
    config: &Config,
    certs: &Arc<CertificateCache>,
    headers: &CallbackHeaders,
    body: &str,
) -> Result<(), AppError> {
    let client = WechatPayClient::from_config(config, certs.clone())?;
    client.verify_callback(headers, body).await?;

    let resource = WechatPayClient::parse_callback_body(body)?;
    let result = client.decrypt_resource(&resource)?;

    if !wechat::is_paid_state(&result.trade_state) {
        tracing::info!(
            order = %result.out_trade_no,
            state = %result.trade_state,
            "ignoring non-paid notification"
        );
        return Ok(());
    }

    let order = find_order(pool, &result.out_trade_no).await?;
    settle_paid_order(pool, config, &order).await
}

/// Apply a verified Alipay asynchronous notify.
pub async fn handle_alipay_notify(
    pool: &DbPool,
    config: &Config,
    params: &BTreeMap<String, String>,
) -> Result<(), AppError> {
    let client = AlipayClient::from_config(config)?;
    if !client.verify_notify(params) {
        return Err(AppError::Gateway(
            "notify signature verification failed".to_string(),
        ));
    }

    let trade_status = params
        .get("trade_status")
        .ok_or_else(|| AppError::Gateway("notify missing trade_status".to_string()))?;
    if !alipay::is_paid_status(trade_status) {
        return Ok(());
    }

    let out_trade_no = params
        .get("out_trade_no")
        .ok_or_else(|| AppError::Gateway("notify missing out_trade_no".to_string()))?;

    let order = find_order(pool, out_trade_no).await?;
    settle_paid_order(pool, config, &order).await
}

/// Transition an order to PAID and credit the balance, exactly once.
///
/// The compare-and-set and the credit commit in one SQL transaction: an
/// order can never be observed PAID without its credit, and a failure
/// anywhere before commit leaves the order PENDING for the next
/// reconciler to retry.
async fn settle_paid_order(
    pool: &DbPool,
    config: &Config,
    order: &RechargeOrder,
) -> Result<(), AppError> {
    let coins = resolve_coins(order.coins_amount, order.amount_fen, config.coins_per_yuan);
    let description = recharge_description(&order.out_trade_no);

    let mut tx = pool.begin().await?;

    // Compare-and-set: of two concurrent reconcilers, only one sees a
    // row transition here; the other observes zero rows and no-ops.
    let won = sqlx::query(
        r#"
        UPDATE recharge_orders
        SET status = 'PAID', paid_at = NOW()
        WHERE out_trade_no = $1 AND status = 'PENDING'
        "#,
    )
    .bind(&order.out_trade_no)
    .execute(&mut *tx)
    .await?
    .rows_affected()
        == 1;

    if !won {
        tx.rollback().await?;
        tracing::debug!(order = %order.out_trade_no, "order already PAID, skipping credit");
        return Ok(());
    }

    // A second recharge entry for the same order must never be inserted,
    // even if the order row was reset to PENDING by hand.
    let already_credited: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM ledger_entries
            WHERE user_id = $1 AND kind = 'recharge' AND description = $2
        )
        "#,
    )
    .bind(order.user_id)
    .bind(&description)
    .fetch_one(&mut *tx)
    .await?;

    if already_credited {
        // Keep the PAID transition; only the duplicate credit is skipped.
        tx.commit().await?;
        tracing::warn!(order = %order.out_trade_no, "recharge credit already in ledger, skipping");
        return Ok(());
    }

    balance_service::credit_in_tx(&mut tx, order.user_id, coins, Tranche::Paid).await?;
    balance_service::insert_ledger_entry(
        &mut tx,
        order.user_id,
        coins,
        LedgerKind::Recharge,
        Some(Tranche::Paid),
        &description,
    )
    .await?;

    tx.commit().await?;

    tracing::info!(
        order = %order.out_trade_no,
        user = %order.user_id,
        coins,
        "recharge order settled"
    );

    Ok(())
}

async fn find_order(pool: &DbPool, out_trade_no: &str) -> Result<RechargeOrder, AppError> {
    sqlx::query_as::<_, RechargeOrder>("SELECT * FROM recharge_orders WHERE out_trade_no = $1")
        .bind(out_trade_no)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Recharge order"))
}

async fn find_order_for_user(
    pool: &DbPool,
    user_id: Uuid,
    out_trade_no: &str,
) -> Result<RechargeOrder, AppError> {
    sqlx::query_as::<_, RechargeOrder>(
        "SELECT * FROM recharge_orders WHERE out_trade_no = $1 AND user_id = $2",
    )
    .bind(out_trade_no)
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Recharge order"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::PgPool;

    fn test_config() -> Config {
        Config {
            database_url: String::new(),
            server_port: 0,
            coins_per_yuan: 10,
            wechat_app_id: None,
            wechat_mch_id: None,
            wechat_serial_no: None,
            wechat_private_key: None,
            wechat_api_v3_key: None,
            wechat_notify_url: None,
            alipay_app_id: None,
            alipay_private_key: None,
            alipay_public_key: None,
            alipay_notify_url: None,
        }
    }

    async fn seed_user(pool: &PgPool) -> Uuid {
        sqlx::query_scalar(
            "INSERT INTO users (api_key_hash, display_name) VALUES ($1, 'tester') RETURNING id",
        )
        .bind(Uuid::new_v4().to_string())
        .fetch_one(pool)
        .await
        .unwrap()
    }

    async fn seed_order(pool: &PgPool, user_id: Uuid, coins: i64) -> RechargeOrder {
        let out_trade_no = new_out_trade_no();
        sqlx::query(
            r#"
            INSERT INTO recharge_orders (out_trade_no, user_id, amount_fen, coins_amount, payment_method)
            VALUES ($1, $2, 1000, $3, 'WECHAT')
            "#,
        )
        .bind(&out_trade_no)
        .bind(user_id)
        .bind(coins)
        .execute(pool)
        .await
        .unwrap();
        find_order(pool, &out_trade_no).await.unwrap()
    }

    #[test]
    fn stored_coins_amount_wins() {
        assert_eq!(resolve_coins(500, 1000, 10), 500);
    }

    #[test]
    fn rejects_out_of_range_order_amounts() {
        assert!(validate_amount_cny(1).is_ok());
        assert!(validate_amount_cny(MAX_ORDER_CNY).is_ok());
        assert!(matches!(
            validate_amount_cny(0),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            validate_amount_cny(MAX_ORDER_CNY + 1),
            Err(AppError::Validation(_))
        ));
    }

    #[sqlx::test]
    async fn settling_a_paid_order_twice_credits_once(pool: PgPool) {
        let user = seed_user(&pool).await;
        let order = seed_order(&pool, user, 100).await;
        let config = test_config();

        settle_paid_order(&pool, &config, &order).await.unwrap();
        settle_paid_order(&pool, &config, &order).await.unwrap();

        let balance = balance_service::read(&pool, user).await.unwrap();
        assert_eq!(balance.paid_coins, 100);
        assert_eq!(balance.total_coins, 100);

        let settled = find_order(&pool, &order.out_trade_no).await.unwrap();
        assert_eq!(settled.status, "PAID");
        assert!(settled.paid_at.is_some());
    }

    #[sqlx::test]
    async fn paid_status_and_credit_land_together(pool: PgPool) {
        let user = seed_user(&pool).await;
        let order = seed_order(&pool, user, 50).await;

        settle_paid_order(&pool, &test_config(), &order).await.unwrap();

        // The PAID transition and the credit commit in one transaction:
        // observing one means observing both.
        let settled = find_order(&pool, &order.out_trade_no).await.unwrap();
        assert_eq!(settled.status, "PAID");

        let entries: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM ledger_entries WHERE user_id = $1 AND kind = 'recharge' AND description = $2",
        )
        .bind(user)
        .bind(recharge_description(&order.out_trade_no))
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(entries, 1);

        let balance = balance_service::read(&pool, user).await.unwrap();
        assert_eq!(balance.paid_coins, 50);
    }

    #[sqlx::test]
    async fn preexisting_credit_marks_paid_without_doubling(pool: PgPool) {
        let user = seed_user(&pool).await;
        let order = seed_order(&pool, user, 100).await;

        // Simulate the state the ledger dedupe defends against: the
        // credit exists but the order is still PENDING.
        let mut tx = pool.begin().await.unwrap();
        balance_service::credit_in_tx(&mut tx, user, 100, Tranche::Paid)
            .await
            .unwrap();
        balance_service::insert_ledger_entry(
            &mut tx,
            user,
            100,
            LedgerKind::Recharge,
            Some(Tranche::Paid),
            &recharge_description(&order.out_trade_no),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        settle_paid_order(&pool, &test_config(), &order).await.unwrap();

        let settled = find_order(&pool, &order.out_trade_no).await.unwrap();
        assert_eq!(settled.status, "PAID");

        let balance = balance_service::read(&pool, user).await.unwrap();
        assert_eq!(balance.total_coins, 100);
    }

    #[test]
    fn missing_coins_amount_derives_from_exchange_rate() {
        // 1000 fen = 10 CNY, at 10 coins/CNY = 100 coins
        assert_eq!(resolve_coins(0, 1000, 10), 100);
    }

    #[test]
    fn recharge_description_embeds_order_id() {
        let description = recharge_description("R20250601ab12cd34");
        assert!(description.contains("R20250601ab12cd34"));
    }

    #[test]
    fn out_trade_no_is_unique_per_call() {
        let a = new_out_trade_no();
        let b = new_out_trade_no();
        assert!(a.starts_with('R'));
        assert_ne!(a, b);
    }
}
