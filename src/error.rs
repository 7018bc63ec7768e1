use std::fmt;

/// Root causes of a failed sort. Public functions return them wrapped in an [anyhow::Error],
/// use `err.downcast_ref::<SortError>()` to match on them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortError {
    UnsupportedKernelParam {
        data_per_work_item: u32,
        work_group_size: u32,
    },
    LengthMismatch {
        keys: usize,
        values: usize,
    },
    TooManyElements {
        len: usize,
        max: usize,
    },
    OutOfMemory {
        bytes: u64,
    },
    TooManyGroups {
        groups: u32,
        compute_units: u32,
    },
    SyncTimeout {
        sync_id: u32,
        group: u32,
    },
}

impl fmt::Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortError::UnsupportedKernelParam {
                data_per_work_item,
                work_group_size,
            } => write!(
                f,
                "unsupported kernel parameters: {data_per_work_item} items per work item (multiple of 32 in 32..=512), work group size {work_group_size} (32 or 64)"
            ),
            SortError::LengthMismatch { keys, values } => write!(
                f,
                "key and value ranges differ in length ({keys} keys, {values} values)"
            ),
            SortError::TooManyElements { len, max } => {
                write!(f, "{len} elements exceed the supported maximum of {max}")
            }
            SortError::OutOfMemory { bytes } => {
                write!(f, "failed to allocate {bytes} bytes of temporary device memory")
            }
            SortError::TooManyGroups {
                groups,
                compute_units,
            } => write!(
                f,
                "cooperative launch of {groups} groups exceeds the {compute_units} compute units of the device"
            ),
            SortError::SyncTimeout { sync_id, group } => write!(
                f,
                "group {group} exceeded the retry limit at inter-group sync point {sync_id}"
            ),
        }
    }
}

impl std::error::Error for SortError {}
