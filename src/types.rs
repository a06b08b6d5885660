/// Advisory lock level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Any number of shared holders may coexist
    Shared,
    /// Excludes every other holder
    Exclusive,
}

impl LockMode {
    pub(crate) fn flock_op(self) -> libc::c_int {
        match self {
            LockMode::Shared => libc::LOCK_SH,
            LockMode::Exclusive => libc::LOCK_EX,
        }
    }
}
