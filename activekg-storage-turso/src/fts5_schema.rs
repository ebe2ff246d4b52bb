//! FTS5 virtual table for lexical search over node text.
//!
//! The `nodes_fts` table is synchronized with `nodes` via triggers, indexing
//! the `text` and `title` props for BM25 ranking. `id` and `tenant_id` are
//! UNINDEXED so they are available for joins and scoping without being
//! tokenized.

/// SQL to create the FTS5 virtual table for nodes.
///
/// Tokenizer: porter unicode61 for stemming and Unicode-aware tokenization.
pub const CREATE_NODES_FTS_TABLE: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS nodes_fts USING fts5(
    id UNINDEXED,
    tenant_id UNINDEXED,
    text,
    title,
    tokenize='porter unicode61'
)
"#;

/// SQL to create synchronization triggers for the nodes FTS table.
///
/// - AFTER INSERT: index the new node's text and title props
/// - AFTER UPDATE: re-index when props change
/// - AFTER DELETE: drop the node from the index
pub const CREATE_NODES_FTS_TRIGGERS: &str = r#"
CREATE TRIGGER IF NOT EXISTS nodes_fts_ai AFTER INSERT ON nodes BEGIN
    INSERT INTO nodes_fts(id, tenant_id, text, title)
    VALUES (
        new.id,
        new.tenant_id,
        COALESCE(json_extract(new.props, '$.text'), ''),
        COALESCE(json_extract(new.props, '$.title'), '')
    );
END;

CREATE TRIGGER IF NOT EXISTS nodes_fts_au AFTER UPDATE OF props ON nodes BEGIN
    DELETE FROM nodes_fts WHERE id = old.id;
    INSERT INTO nodes_fts(id, tenant_id, text, title)
    VALUES (
        new.id,
        new.tenant_id,
        COALESCE(json_extract(new.props, '$.text'), ''),
        COALESCE(json_extract(new.props, '$.title'), '')
    );
END;

CREATE TRIGGER IF NOT EXISTS nodes_fts_ad AFTER DELETE ON nodes BEGIN
    DELETE FROM nodes_fts WHERE id = old.id;
END;
"#;

/// SQL to optimize the FTS index (maintenance).
#[allow(dead_code)]
pub const OPTIMIZE_NODES_FTS: &str = r#"
INSERT INTO nodes_fts(nodes_fts) VALUES('optimize')
"#;
