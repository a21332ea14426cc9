//! Write command validation against fixed size limits.

use ipclaim_kv_types::KeyValueStoreError;
use ipclaim_kv_types::WriteCommand;

use crate::constants::MAX_KEY_SIZE;
use crate::constants::MAX_VALUE_SIZE;

/// Validate a write command against fixed size limits.
pub fn validate_write_command(command: &WriteCommand) -> Result<(), KeyValueStoreError> {
    let check_key = |key: &str| {
        if key.is_empty() {
            return Err(KeyValueStoreError::EmptyKey);
        }
        let len = key.len();
        if len > MAX_KEY_SIZE as usize {
            Err(KeyValueStoreError::KeyTooLarge {
                size: len as u32,
                max: MAX_KEY_SIZE,
            })
        } else {
            Ok(())
        }
    };

    let check_value = |value: &str| {
        let len = value.len();
        if len > MAX_VALUE_SIZE as usize {
            Err(KeyValueStoreError::ValueTooLarge {
                size: len as u32,
                max: MAX_VALUE_SIZE,
            })
        } else {
            Ok(())
        }
    };

    let check_ttl = |key: &str, ttl_ms: u64| {
        if ttl_ms == 0 {
            Err(KeyValueStoreError::InvalidTtl { key: key.to_string() })
        } else {
            Ok(())
        }
    };

    match command {
        WriteCommand::Set { key, value } => {
            check_key(key)?;
            check_value(value)?;
        }
        WriteCommand::SetWithTTL { key, value, ttl_ms } | WriteCommand::CreateWithTTL { key, value, ttl_ms } => {
            check_key(key)?;
            check_value(value)?;
            check_ttl(key, *ttl_ms)?;
        }
        WriteCommand::CompareAndSwap {
            key,
            expected,
            new_value,
        } => {
            check_key(key)?;
            if let Some(expected) = expected {
                check_value(expected)?;
            }
            check_value(new_value)?;
        }
        WriteCommand::CompareAndSwapWithTTL {
            key,
            expected,
            new_value,
            ttl_ms,
        } => {
            check_key(key)?;
            check_value(expected)?;
            check_value(new_value)?;
            check_ttl(key, *ttl_ms)?;
        }
        WriteCommand::Delete { key } => {
            check_key(key)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use ipclaim_kv_types::WriteRequest;

    use super::*;

    #[test]
    fn rejects_empty_key() {
        let cmd = WriteRequest::set("", "v").command;
        assert_eq!(validate_write_command(&cmd), Err(KeyValueStoreError::EmptyKey));
    }

    #[test]
    fn rejects_oversized_key() {
        let key = "k".repeat(MAX_KEY_SIZE as usize + 1);
        let cmd = WriteRequest::delete(key).command;
        assert!(matches!(
            validate_write_command(&cmd),
            Err(KeyValueStoreError::KeyTooLarge { max: MAX_KEY_SIZE, .. })
        ));
    }

    #[test]
    fn rejects_oversized_value() {
        let value = "v".repeat(MAX_VALUE_SIZE as usize + 1);
        let cmd = WriteRequest::create_with_ttl("k", value, 1).command;
        assert!(matches!(validate_write_command(&cmd), Err(KeyValueStoreError::ValueTooLarge { .. })));
    }

    #[test]
    fn rejects_zero_ttl() {
        let cmd = WriteRequest::compare_and_swap_with_ttl("k", "a", "a", 0).command;
        assert_eq!(
            validate_write_command(&cmd),
            Err(KeyValueStoreError::InvalidTtl { key: "k".into() })
        );
    }

    #[test]
    fn accepts_boundary_sizes() {
        let key = "k".repeat(MAX_KEY_SIZE as usize);
        let cmd = WriteRequest::set_with_ttl(key, "v", 1).command;
        assert!(validate_write_command(&cmd).is_ok());
    }
}
