pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS transactions (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  config_key TEXT NOT NULL,
  created_at TEXT NOT NULL,
  commit_id TEXT,
  raw_json TEXT NOT NULL,
  metrics_json TEXT NOT NULL,
  tags_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tx_config_created
  ON transactions(config_key, created_at);

CREATE TABLE IF NOT EXISTS snapshots (
  config_key TEXT NOT NULL,
  version INTEGER NOT NULL,
  transaction_id INTEGER NOT NULL REFERENCES transactions(id),
  is_current INTEGER NOT NULL DEFAULT 0,
  is_baseline INTEGER NOT NULL DEFAULT 0,
  created_at TEXT NOT NULL,
  PRIMARY KEY (config_key, version)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_snapshots_one_current
  ON snapshots(config_key) WHERE is_current = 1;

CREATE UNIQUE INDEX IF NOT EXISTS idx_snapshots_one_baseline
  ON snapshots(config_key) WHERE is_baseline = 1;

CREATE TABLE IF NOT EXISTS category_metrics (
  transaction_id INTEGER NOT NULL REFERENCES transactions(id),
  category TEXT NOT NULL,
  total INTEGER NOT NULL,
  detected INTEGER NOT NULL,
  detection_rate REAL,
  delta_from_previous REAL,
  severity TEXT NOT NULL,
  PRIMARY KEY (transaction_id, category)
);
"#;
