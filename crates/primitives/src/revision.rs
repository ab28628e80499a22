//! Hardfork revision tags and the compile-time [Traits] dispatch used to
//! monomorphise per-revision executors.

/// Ethereum hardfork level, ordered oldest to newest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[allow(missing_docs)]
pub enum Revision {
    Frontier,
    Homestead,
    TangerineWhistle,
    SpuriousDragon,
    Byzantium,
    Constantinople,
    Petersburg,
    Istanbul,
    Berlin,
    London,
    Paris,
    Shanghai,
    Cancun,
    Prague,
    Osaka,
}

/// Monad's own revision ladder, layered on top of the Ethereum base revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[allow(missing_docs)]
pub enum MonadRevision {
    MonadZero,
    MonadOne,
    MonadTwo,
    MonadThree,
    MonadFour,
}

/// Compile-time revision pair. Block execution is monomorphised over an
/// implementation of this trait so revision checks on the hot path fold to
/// constants.
pub trait Traits: Send + Sync + 'static {
    /// The Ethereum base revision.
    const EVM_REV: Revision;
    /// The Monad revision, or `None` when replaying plain Ethereum history.
    const MONAD_REV: Option<MonadRevision>;

    /// Returns `true` if the Ethereum revision is at least `rev`.
    fn evm_rev_at_least(rev: Revision) -> bool {
        Self::EVM_REV >= rev
    }

    /// Returns `true` if this is a Monad chain at `rev` or later.
    fn monad_rev_at_least(rev: MonadRevision) -> bool {
        Self::MONAD_REV.is_some_and(|r| r >= rev)
    }
}

macro_rules! define_traits {
    ($($(#[$doc:meta])* $name:ident => ($evm:ident, $monad:expr)),* $(,)?) => {
        $(
            $(#[$doc])*
            #[derive(Debug, Clone, Copy)]
            pub struct $name;

            impl Traits for $name {
                const EVM_REV: Revision = Revision::$evm;
                const MONAD_REV: Option<MonadRevision> = $monad;
            }
        )*
    };
}

define_traits! {
    /// Plain Ethereum Shanghai, used for historical replay.
    EthShanghai => (Shanghai, None),
    /// Plain Ethereum Cancun, used for historical replay.
    EthCancun => (Cancun, None),
    /// Plain Ethereum Prague, used for historical replay.
    EthPrague => (Prague, None),
    /// Monad genesis revision over a Cancun base.
    MonadZeroTraits => (Cancun, Some(MonadRevision::MonadZero)),
    /// First Monad revision: gas refunds removed.
    MonadOneTraits => (Cancun, Some(MonadRevision::MonadOne)),
    /// Second Monad revision: 128 KiB contract code.
    MonadTwoTraits => (Cancun, Some(MonadRevision::MonadTwo)),
    /// Third Monad revision.
    MonadThreeTraits => (Cancun, Some(MonadRevision::MonadThree)),
    /// Fourth Monad revision: sender reserve balance enforcement.
    MonadFourTraits => (Cancun, Some(MonadRevision::MonadFour)),
}

/// Expands a call for each supported revision pair, selecting the
/// monomorphised instantiation that matches the runtime `(Revision,
/// Option<MonadRevision>)` tag. Unsupported pairs are unreachable by
/// construction: chain rules only ever produce the tags listed here.
#[macro_export]
macro_rules! with_revision {
    ($rev:expr, $func:ident :: < $($gen:ty),+ > ( $($args:expr),* $(,)? )) => {{
        use $crate::{MonadRevision, Revision};
        match $rev {
            (Revision::Shanghai, None) => $func::<$crate::revision::EthShanghai, $($gen),+>($($args),*),
            (Revision::Cancun, None) => $func::<$crate::revision::EthCancun, $($gen),+>($($args),*),
            (Revision::Prague, None) => $func::<$crate::revision::EthPrague, $($gen),+>($($args),*),
            (Revision::Cancun, Some(MonadRevision::MonadZero)) => {
                $func::<$crate::revision::MonadZeroTraits, $($gen),+>($($args),*)
            }
            (Revision::Cancun, Some(MonadRevision::MonadOne)) => {
                $func::<$crate::revision::MonadOneTraits, $($gen),+>($($args),*)
            }
            (Revision::Cancun, Some(MonadRevision::MonadTwo)) => {
                $func::<$crate::revision::MonadTwoTraits, $($gen),+>($($args),*)
            }
            (Revision::Cancun, Some(MonadRevision::MonadThree)) => {
                $func::<$crate::revision::MonadThreeTraits, $($gen),+>($($args),*)
            }
            (Revision::Cancun, Some(MonadRevision::MonadFour)) => {
                $func::<$crate::revision::MonadFourTraits, $($gen),+>($($args),*)
            }
            (evm, monad) => unreachable!("unsupported revision pair {evm:?}/{monad:?}"),
        }
    }};
    ($rev:expr, $func:ident ( $($args:expr),* $(,)? )) => {{
        use $crate::{MonadRevision, Revision};
        match $rev {
            (Revision::Shanghai, None) => $func::<$crate::revision::EthShanghai>($($args),*),
            (Revision::Cancun, None) => $func::<$crate::revision::EthCancun>($($args),*),
            (Revision::Prague, None) => $func::<$crate::revision::EthPrague>($($args),*),
            (Revision::Cancun, Some(MonadRevision::MonadZero)) => {
                $func::<$crate::revision::MonadZeroTraits>($($args),*)
            }
            (Revision::Cancun, Some(MonadRevision::MonadOne)) => {
                $func::<$crate::revision::MonadOneTraits>($($args),*)
            }
            (Revision::Cancun, Some(MonadRevision::MonadTwo)) => {
                $func::<$crate::revision::MonadTwoTraits>($($args),*)
            }
            (Revision::Cancun, Some(MonadRevision::MonadThree)) => {
                $func::<$crate::revision::MonadThreeTraits>($($args),*)
            }
            (Revision::Cancun, Some(MonadRevision::MonadFour)) => {
                $func::<$crate::revision::MonadFourTraits>($($args),*)
            }
            (evm, monad) => unreachable!("unsupported revision pair {evm:?}/{monad:?}"),
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revision_ordering() {
        assert!(Revision::Cancun > Revision::Shanghai);
        assert!(Revision::Frontier < Revision::Prague);
        assert!(MonadRevision::MonadFour > MonadRevision::MonadZero);
    }

    #[test]
    fn test_traits_constants() {
        assert_eq!(MonadFourTraits::EVM_REV, Revision::Cancun);
        assert!(MonadFourTraits::monad_rev_at_least(MonadRevision::MonadFour));
        assert!(!MonadZeroTraits::monad_rev_at_least(MonadRevision::MonadOne));
        assert!(!EthCancun::monad_rev_at_least(MonadRevision::MonadZero));
        assert!(EthCancun::evm_rev_at_least(Revision::Shanghai));
    }

    fn revision_of<T: Traits>() -> Revision {
        T::EVM_REV
    }

    #[test]
    fn test_with_revision_dispatch() {
        let rev = with_revision!((Revision::Cancun, Some(MonadRevision::MonadFour)), revision_of());
        assert_eq!(rev, Revision::Cancun);
        let rev = with_revision!((Revision::Shanghai, None), revision_of());
        assert_eq!(rev, Revision::Shanghai);
    }
}
