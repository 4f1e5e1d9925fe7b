//! A logging shim to support both `log`-compatible crates in `std`
//! environments, as well as `defmt` in `no_std`.

#![allow(unused_macros, unused_imports)]

macro_rules! trace {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "log")]
            ::log::trace!($s $(, $x)*);
            #[cfg(all(not(feature = "log"), feature = "defmt"))]
            ::defmt::trace!($s $(, $x)*);
            #[cfg(all(not(feature = "log"), not(feature = "defmt")))]
            let _ = ($( &$x ),*);
        }
    };
}

macro_rules! debug {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "log")]
            ::log::debug!($s $(, $x)*);
            #[cfg(all(not(feature = "log"), feature = "defmt"))]
            ::defmt::debug!($s $(, $x)*);
            #[cfg(all(not(feature = "log"), not(feature = "defmt")))]
            let _ = ($( &$x ),*);
        }
    };
}

macro_rules! info {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "log")]
            ::log::info!($s $(, $x)*);
            #[cfg(all(not(feature = "log"), feature = "defmt"))]
            ::defmt::info!($s $(, $x)*);
            #[cfg(all(not(feature = "log"), not(feature = "defmt")))]
            let _ = ($( &$x ),*);
        }
    };
}

macro_rules! warning {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "log")]
            ::log::warn!($s $(, $x)*);
            #[cfg(all(not(feature = "log"), feature = "defmt"))]
            ::defmt::warn!($s $(, $x)*);
            #[cfg(all(not(feature = "log"), not(feature = "defmt")))]
            let _ = ($( &$x ),*);
        }
    };
}

macro_rules! error {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "log")]
            ::log::error!($s $(, $x)*);
            #[cfg(all(not(feature = "log"), feature = "defmt"))]
            ::defmt::error!($s $(, $x)*);
            #[cfg(all(not(feature = "log"), not(feature = "defmt")))]
            let _ = ($( &$x ),*);
        }
    };
}

pub(crate) use {debug, error, info, trace, warning};
