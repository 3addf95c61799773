use crate::store::{Store, StoreError};

const VERSION_KEY: &str = "schema_version";

type MigrationFn = fn(&Store) -> Result<(), StoreError>;

fn migrations() -> Vec<(&'static str, MigrationFn)> {
    vec![
        ("001_initial", m001_initial),
        ("002_items_by_elo", m002_items_by_elo),
        ("003_interaction_indexes", m003_interaction_indexes),
    ]
}

/// 执行所有未应用的数据库迁移。
///
/// - 每个迁移必须幂等：进程可能在迁移完成后、写入版本号前崩溃，重启后会重跑。
/// - 版本号在每个迁移成功后立即持久化。
/// - 仅向前：set_version 拒绝降级。
pub fn run(store: &Store) -> Result<(), StoreError> {
    let current = get_current_version(store)?;
    let all = migrations();

    for (index, (name, func)) in all.iter().enumerate() {
        let version = (index + 1) as u32;
        if version > current {
            tracing::info!(version, name, "Running migration");
            func(store)?;
            set_version(store, version)?;
            tracing::info!(version, name, "Migration complete");
        } else {
            tracing::debug!(version, name, "Migration already applied, skipping");
        }
    }

    Ok(())
}

pub fn latest_version() -> u32 {
    migrations().len() as u32
}

pub fn get_current_version(store: &Store) -> Result<u32, StoreError> {
    match store.meta.get(VERSION_KEY.as_bytes())? {
        Some(raw) => {
            let bytes: [u8; 4] = raw.as_ref().try_into().map_err(|_| StoreError::Migration {
                version: 0,
                message: format!("schema version has {} bytes, expected 4", raw.len()),
            })?;
            Ok(u32::from_be_bytes(bytes))
        }
        None => Ok(0),
    }
}

pub fn set_version(store: &Store, version: u32) -> Result<(), StoreError> {
    let current = get_current_version(store)?;
    if version < current {
        return Err(StoreError::Migration {
            version,
            message: format!("Refuse to downgrade from {} to {}", current, version),
        });
    }

    store
        .meta
        .insert(VERSION_KEY.as_bytes(), &version.to_be_bytes())?;
    Ok(())
}

fn m001_initial(_store: &Store) -> Result<(), StoreError> {
    Ok(())
}

fn m002_items_by_elo(store: &Store) -> Result<(), StoreError> {
    let indexed = store.rebuild_item_elo_index()?;
    tracing::info!(indexed, "Rebuilt item difficulty index");
    Ok(())
}

fn m003_interaction_indexes(store: &Store) -> Result<(), StoreError> {
    let indexed = store.rebuild_interaction_indexes()?;
    tracing::info!(indexed, "Rebuilt interaction indexes");
    Ok(())
}
