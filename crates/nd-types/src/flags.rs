use bitflags::bitflags;

bitflags! {
    /// Caller-side filters for address-list queries.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct QueryFlags: u32 {
        /// Leave out addresses serviced by legacy (v1) providers.
        const EXCLUDE_V1 = 0x1;
        /// Leave out addresses serviced by current (v2) providers.
        const EXCLUDE_V2 = 0x2;
    }
}
