//! Testing infrastructure for xkl-core
//!
//! Integration tests run the engine against the headless backend, with the registry
//! shipped in the source tree (`data/`) as the catalog of known names.
//!
//! # Example
//!
//! ```ignore
//! use xkl_core::testing::Fixture;
//!
//! #[test]
//! fn test_group_change() {
//!     let mut fixture = Fixture::with_layouts(&["us", "dk"]).unwrap();
//!     fixture.simulate_group_change(1);
//!     assert_eq!(fixture.engine().current_state().group, 0);
//! }
//! ```

mod fixture;

pub use fixture::Fixture;
