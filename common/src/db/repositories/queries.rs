// SQL query constants for repositories
// Centralizes repeated SELECT column lists to follow DRY principle

/// SQL query fragments for the scheduled_tasks table.
pub mod scheduled_task_queries {
    pub const SELECT_ALL_COLUMNS: &str = r#"uuid, api_key_id, user_id, name, description,
        cron_expression, timezone, task_type, task_payload, concurrency_mode,
        max_executions_per_day, min_credits_required, is_active, is_paused, pause_reason,
        next_execution_at, last_execution_at, total_executions, successful_executions,
        failed_executions, consecutive_failures, tags,
        COALESCE(metadata, '{}'::jsonb) as metadata, created_at, updated_at"#;
}

/// SQL query fragments for the task_executions table.
pub mod task_execution_queries {
    pub const SELECT_ALL_COLUMNS: &str = r#"uuid, scheduled_task_uuid, execution_number,
        idempotency_key, status, scheduled_for, started_at, completed_at, triggered_by,
        job_uuid, error_message, error_code,
        COALESCE(error_details, 'null'::jsonb) as error_details, created_at, updated_at"#;
}

/// SQL query fragments for the jobs table.
pub mod job_queries {
    pub const SELECT_ALL_COLUMNS: &str = r#"uuid, job_id, api_key_id, job_type, job_queue_name, url,
        payload, origin, status, is_success, total, completed, failed, credits_used,
        deducted_at, created_at, updated_at, expire_at"#;
}

/// SQL query fragments for the billing_ledger table.
pub mod billing_ledger_queries {
    pub const SELECT_ALL_COLUMNS: &str = r#"uuid, job_id, api_key_id, mode, reason,
        idempotency_key, charged, before_used, after_used, before_credits, after_credits,
        COALESCE(charge_details, 'null'::jsonb) as charge_details, created_at"#;
}

/// SQL query fragments for the page_cache table.
pub mod page_cache_queries {
    pub const SELECT_ALL_COLUMNS: &str = r#"uuid, url_hash, options_hash, domain,
        content_hash, title, description, status_code, content_type, content_length,
        engine, has_proxy, has_screenshot, scraped_at, object_store_key"#;
}

/// SQL query fragments for the map_cache table.
pub mod map_cache_queries {
    pub const SELECT_ALL_COLUMNS: &str = r#"uuid, domain_hash, domain, source, urls,
        titles, descriptions, discovered_at"#;
}

/// SQL query fragments for the api_key table.
pub mod api_key_queries {
    pub const SELECT_ALL_COLUMNS: &str = "id, credits, tier, last_used_at";
}

pub mod template_queries {
    pub const SELECT_ALL_COLUMNS: &str =
        "uuid, api_key_id, name, task_type, task_payload, created_at, updated_at";
}
