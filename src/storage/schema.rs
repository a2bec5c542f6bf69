use scylla::client::session::Session;

/// Create the keyspace and tables this service writes to, then switch the
/// session into the keyspace.
pub async fn ensure_schema(session: &Session, keyspace: &str) -> anyhow::Result<()> {
    if !keyspace.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        anyhow::bail!("invalid keyspace name: {}", keyspace);
    }

    session
        .query_unpaged(
            format!(
                "CREATE KEYSPACE IF NOT EXISTS {} WITH REPLICATION = \
                 {{'class': 'SimpleStrategy', 'replication_factor': 1}}",
                keyspace
            ),
            &[],
        )
        .await?;

    session.use_keyspace(keyspace, false).await?;

    session
        .query_unpaged(
            "CREATE TABLE IF NOT EXISTS dead_letter_queue (
                id uuid PRIMARY KEY,
                event_id uuid,
                aggregate_id uuid,
                event_type text,
                payload text,
                error_message text,
                failure_count int,
                first_failed_at timestamp,
                last_failed_at timestamp,
                origin text,
                created_at timestamp
            )",
            &[],
        )
        .await?;

    session
        .query_unpaged(
            "CREATE TABLE IF NOT EXISTS processed_events (
                consumer_group text,
                event_id uuid,
                processed_at timestamp,
                PRIMARY KEY ((consumer_group, event_id))
            )",
            &[],
        )
        .await?;

    tracing::info!(keyspace = %keyspace, "Schema ready");
    Ok(())
}
