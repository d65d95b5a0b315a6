//! SQL 定義
//!
//! Insert は注文ヘッダの `RETURNING id` を子テーブルの FK に使う。
//! 読み取りは DB 側で JSON を組み立てて 1 行で返す。

/// orders へのヘッダ挿入（サーバ採番の id を返す）
pub const INSERT_ORDER: &str = r#"
    INSERT INTO orders (
        order_uid, track_number, entry, locale, internal_signature, customer_id,
        delivery_service, shard_key, sm_id, date_created, oof_shard, created_at, updated_at
    ) VALUES (
        $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NOW(), NOW()
    ) RETURNING id
"#;

/// deliveries への挿入。order_id はヘッダ挿入が返した id
pub const INSERT_DELIVERY: &str = r#"
    INSERT INTO deliveries (
        order_id, name, phone, zip, city, address, region, email
    ) VALUES (
        $1, $2, $3, $4, $5, $6, $7, $8
    )
"#;

pub const INSERT_PAYMENT: &str = r#"
    INSERT INTO payments (
        order_id, transaction, request_id, currency, provider, amount,
        payment_dt, bank, delivery_cost, goods_total, custom_fee
    ) VALUES (
        $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11
    )
"#;

pub const INSERT_ITEM: &str = r#"
    INSERT INTO items (
        order_id, chrt_id, track_number, price, rid, name,
        sale, size, total_price, nm_id, brand, status
    ) VALUES (
        $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12
    )
"#;

/// 注文 1 件をワイヤ形式の JSON として取得する
pub const SELECT_ORDER_JSON: &str = r#"
    SELECT
        json_build_object(
            'order_uid', o.order_uid,
            'track_number', o.track_number,
            'entry', o.entry,
            'delivery', json_build_object(
                'name', d.name,
                'phone', d.phone,
                'zip', d.zip,
                'city', d.city,
                'address', d.address,
                'region', d.region,
                'email', d.email
            ),
            'payment', json_build_object(
                'transaction', p.transaction,
                'request_id', p.request_id,
                'currency', p.currency,
                'provider', p.provider,
                'amount', p.amount,
                'payment_dt', p.payment_dt,
                'bank', p.bank,
                'delivery_cost', p.delivery_cost,
                'goods_total', p.goods_total,
                'custom_fee', p.custom_fee
            ),
            'items', COALESCE(i.items_json, '[]'::json),
            'locale', o.locale,
            'internal_signature', o.internal_signature,
            'customer_id', o.customer_id,
            'delivery_service', o.delivery_service,
            'shardkey', o.shard_key,
            'sm_id', o.sm_id,
            'date_created', o.date_created,
            'oof_shard', o.oof_shard
        )
    FROM
        orders o
    JOIN
        deliveries d ON o.id = d.order_id
    JOIN
        payments p ON o.id = p.order_id
    LEFT JOIN
        (
            SELECT
                order_id,
                json_agg(json_build_object(
                    'chrt_id', chrt_id,
                    'track_number', track_number,
                    'price', price,
                    'rid', rid,
                    'name', name,
                    'sale', sale,
                    'size', size,
                    'total_price', total_price,
                    'nm_id', nm_id,
                    'brand', brand,
                    'status', status
                ) ORDER BY id) AS items_json
            FROM
                items
            GROUP BY
                order_id
        ) i ON o.id = i.order_id
    WHERE
        o.order_uid = $1
"#;

/// 更新日時の新しい順に最大 N 件をワイヤ形式の JSON で取得する
pub const SELECT_LATEST_ORDERS_JSON: &str = r#"
    SELECT
        json_build_object(
            'order_uid', o.order_uid,
            'track_number', o.track_number,
            'entry', o.entry,
            'delivery', json_build_object(
                'name', d.name,
                'phone', d.phone,
                'zip', d.zip,
                'city', d.city,
                'address', d.address,
                'region', d.region,
                'email', d.email
            ),
            'payment', json_build_object(
                'transaction', p.transaction,
                'request_id', p.request_id,
                'currency', p.currency,
                'provider', p.provider,
                'amount', p.amount,
                'payment_dt', p.payment_dt,
                'bank', p.bank,
                'delivery_cost', p.delivery_cost,
                'goods_total', p.goods_total,
                'custom_fee', p.custom_fee
            ),
            'items', COALESCE(i.items_json, '[]'::json),
            'locale', o.locale,
            'internal_signature', o.internal_signature,
            'customer_id', o.customer_id,
            'delivery_service', o.delivery_service,
            'shardkey', o.shard_key,
            'sm_id', o.sm_id,
            'date_created', o.date_created,
            'oof_shard', o.oof_shard
        )
    FROM
        orders o
    JOIN
        deliveries d ON o.id = d.order_id
    JOIN
        payments p ON o.id = p.order_id
    LEFT JOIN
        (
            SELECT
                order_id,
                json_agg(json_build_object(
                    'chrt_id', chrt_id,
                    'track_number', track_number,
                    'price', price,
                    'rid', rid,
                    'name', name,
                    'sale', sale,
                    'size', size,
                    'total_price', total_price,
                    'nm_id', nm_id,
                    'brand', brand,
                    'status', status
                ) ORDER BY id) AS items_json
            FROM
                items
            GROUP BY
                order_id
        ) i ON o.id = i.order_id
    ORDER BY
        o.updated_at DESC
    LIMIT $1
"#;
