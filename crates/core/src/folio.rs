//! Folio sequence and allocation.
//!
//! A folio is `<PREFIX>-<zero padded counter>` (for example `CIC-00001`). The sequence only
//! understands the trailing run of ASCII digits; everything before it is an opaque prefix that is
//! carried over verbatim.

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::domain::quotation::UserId;

pub const DEFAULT_FOLIO_PREFIX: &str = "CIC";
pub const DEFAULT_FOLIO_WIDTH: usize = 5;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 100;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FolioSequence {
    prefix: String,
    width: usize,
}

impl Default for FolioSequence {
    fn default() -> Self {
        Self::new(DEFAULT_FOLIO_PREFIX, DEFAULT_FOLIO_WIDTH)
    }
}

impl FolioSequence {
    pub fn new(prefix: impl Into<String>, width: usize) -> Self {
        Self { prefix: prefix.into(), width: width.max(1) }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn first(&self) -> String {
        format!("{}-{:0width$}", self.prefix, 1, width = self.width)
    }

    pub fn next(&self, last: Option<&str>) -> String {
        match last.map(str::trim).filter(|folio| !folio.is_empty()) {
            Some(folio) => increment_folio(folio),
            None => self.first(),
        }
    }
}

/// Successor of `last` in the default `CIC` sequence.
pub fn next_folio(last: Option<&str>) -> String {
    FolioSequence::default().next(last)
}

/// Increments the trailing digit run, keeping its width unless the carry overflows it.
/// A folio without trailing digits is returned unchanged.
pub fn increment_folio(folio: &str) -> String {
    let digit_count = folio.bytes().rev().take_while(u8::is_ascii_digit).count();
    if digit_count == 0 {
        return folio.to_string();
    }

    let (prefix, digits) = folio.split_at(folio.len() - digit_count);
    let mut bytes = digits.as_bytes().to_vec();
    let mut carry = true;
    for byte in bytes.iter_mut().rev() {
        if !carry {
            break;
        }
        if *byte == b'9' {
            *byte = b'0';
        } else {
            *byte += 1;
            carry = false;
        }
    }
    if carry {
        bytes.insert(0, b'1');
    }

    let mut next = String::with_capacity(prefix.len() + bytes.len());
    next.push_str(prefix);
    next.extend(bytes.into_iter().map(char::from));
    next
}

/// Read side of the store that the allocator consults. Implementations scope every lookup to
/// the given user.
#[async_trait]
pub trait FolioLedger: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn latest_folio(&self, user_id: &UserId) -> Result<Option<String>, Self::Error>;

    async fn folio_exists(&self, user_id: &UserId, folio: &str) -> Result<bool, Self::Error>;
}

#[derive(Debug, Error)]
pub enum AllocationError<E>
where
    E: std::error::Error + 'static,
{
    #[error("no free folio found after {attempts} attempts (last tried `{last_attempt}`)")]
    Exhausted { last_attempt: String, attempts: u32 },
    #[error("folio lookup failed: {0}")]
    Ledger(#[source] E),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FolioAllocation {
    pub folio: String,
    pub attempts: u32,
}

/// Bounded check-then-advance allocator. The budget is shared by existence checks and by
/// retries after a uniqueness conflict reported on insert.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FolioAllocator {
    sequence: FolioSequence,
    max_attempts: u32,
}

impl Default for FolioAllocator {
    fn default() -> Self {
        Self::new(FolioSequence::default(), DEFAULT_MAX_ATTEMPTS)
    }
}

impl FolioAllocator {
    pub fn new(sequence: FolioSequence, max_attempts: u32) -> Self {
        Self { sequence, max_attempts: max_attempts.max(1) }
    }

    pub fn sequence(&self) -> &FolioSequence {
        &self.sequence
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Explicit folio when non-empty after trimming, otherwise the successor of the user's
    /// latest folio.
    pub async fn desired_folio<L>(
        &self,
        ledger: &L,
        user_id: &UserId,
        explicit: Option<&str>,
    ) -> Result<String, L::Error>
    where
        L: FolioLedger + ?Sized,
    {
        if let Some(folio) = explicit.map(str::trim).filter(|folio| !folio.is_empty()) {
            return Ok(folio.to_string());
        }
        let latest = ledger.latest_folio(user_id).await?;
        Ok(self.sequence.next(latest.as_deref()))
    }

    pub async fn allocate<L>(
        &self,
        ledger: &L,
        user_id: &UserId,
        explicit: Option<&str>,
    ) -> Result<FolioAllocation, AllocationError<L::Error>>
    where
        L: FolioLedger + ?Sized,
    {
        let desired =
            self.desired_folio(ledger, user_id, explicit).await.map_err(AllocationError::Ledger)?;
        let mut attempts = 0;
        let folio = self.probe(ledger, user_id, desired, &mut attempts).await?;
        Ok(FolioAllocation { folio, attempts })
    }

    /// Walks forward from `start` until a folio the user does not own yet is found, charging
    /// every existence check against `attempts`.
    pub async fn probe<L>(
        &self,
        ledger: &L,
        user_id: &UserId,
        start: String,
        attempts: &mut u32,
    ) -> Result<String, AllocationError<L::Error>>
    where
        L: FolioLedger + ?Sized,
    {
        let mut candidate = start;
        while *attempts < self.max_attempts {
            *attempts += 1;
            let taken =
                ledger.folio_exists(user_id, &candidate).await.map_err(AllocationError::Ledger)?;
            if !taken {
                return Ok(candidate);
            }

            let next = increment_folio(&candidate);
            debug!(
                event_name = "folio.collision",
                user_id = %user_id,
                folio = %candidate,
                next_folio = %next,
                attempt = *attempts,
                "folio already taken, advancing"
            );
            candidate = next;
        }

        Err(AllocationError::Exhausted { last_attempt: candidate, attempts: *attempts })
    }

    /// Next free folio after `taken`, for conflict responses. `None` when the budget runs out.
    pub async fn suggest_after<L>(
        &self,
        ledger: &L,
        user_id: &UserId,
        taken: &str,
    ) -> Result<Option<String>, L::Error>
    where
        L: FolioLedger + ?Sized,
    {
        let mut attempts = 0;
        match self.probe(ledger, user_id, increment_folio(taken), &mut attempts).await {
            Ok(folio) => Ok(Some(folio)),
            Err(AllocationError::Exhausted { .. }) => Ok(None),
            Err(AllocationError::Ledger(error)) => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::convert::Infallible;

    use async_trait::async_trait;

    use crate::domain::quotation::UserId;

    use super::{
        increment_folio, next_folio, AllocationError, FolioAllocator, FolioLedger, FolioSequence,
    };

    struct FixedLedger {
        latest: Option<String>,
        taken: BTreeSet<String>,
    }

    impl FixedLedger {
        fn new(latest: Option<&str>, taken: &[&str]) -> Self {
            Self {
                latest: latest.map(ToOwned::to_owned),
                taken: taken.iter().map(|folio| folio.to_string()).collect(),
            }
        }
    }

    #[async_trait]
    impl FolioLedger for FixedLedger {
        type Error = Infallible;

        async fn latest_folio(&self, _user_id: &UserId) -> Result<Option<String>, Infallible> {
            Ok(self.latest.clone())
        }

        async fn folio_exists(&self, _user_id: &UserId, folio: &str) -> Result<bool, Infallible> {
            Ok(self.taken.contains(folio))
        }
    }

    fn user() -> UserId {
        UserId("user-1".to_string())
    }

    #[test]
    fn next_folio_increments_and_keeps_width() {
        assert_eq!(next_folio(None), "CIC-00001");
        assert_eq!(next_folio(Some("CIC-00001")), "CIC-00002");
        assert_eq!(next_folio(Some("CIC-00099")), "CIC-00100");
        assert_eq!(next_folio(Some("CIC-99999")), "CIC-100000");
    }

    #[test]
    fn prefix_is_preserved_verbatim() {
        assert_eq!(increment_folio("ACME-2026-0041"), "ACME-2026-0042");
        assert_eq!(increment_folio("x9"), "x10");
        assert_eq!(increment_folio("007"), "008");
    }

    #[test]
    fn folio_without_trailing_digits_is_unchanged() {
        assert_eq!(increment_folio("CIC-ABC"), "CIC-ABC");
        assert_eq!(next_folio(Some("   ")), "CIC-00001");
    }

    #[test]
    fn custom_sequence_starts_at_its_own_prefix() {
        let sequence = FolioSequence::new("COT", 3);
        assert_eq!(sequence.first(), "COT-001");
        assert_eq!(sequence.next(Some("COT-009")), "COT-010");
    }

    #[tokio::test]
    async fn allocates_after_existing_folios() {
        let ledger = FixedLedger::new(Some("CIC-00002"), &["CIC-00001", "CIC-00002"]);
        let allocation =
            FolioAllocator::default().allocate(&ledger, &user(), None).await.expect("allocate");

        assert_eq!(allocation.folio, "CIC-00003");
        assert_eq!(allocation.attempts, 1);
    }

    #[tokio::test]
    async fn explicit_folio_collision_advances_past_taken_values() {
        let ledger = FixedLedger::new(Some("CIC-00001"), &["CIC-00005", "CIC-00006"]);
        let allocation = FolioAllocator::default()
            .allocate(&ledger, &user(), Some(" CIC-00005 "))
            .await
            .expect("allocate");

        assert_eq!(allocation.folio, "CIC-00007");
        assert_eq!(allocation.attempts, 3);
    }

    #[tokio::test]
    async fn empty_store_starts_the_sequence() {
        let ledger = FixedLedger::new(None, &[]);
        let allocation =
            FolioAllocator::default().allocate(&ledger, &user(), Some("")).await.expect("allocate");

        assert_eq!(allocation.folio, "CIC-00001");
    }

    #[tokio::test]
    async fn non_numeric_collision_exhausts_the_budget() {
        let ledger = FixedLedger::new(None, &["ESPECIAL"]);
        let allocator = FolioAllocator::new(FolioSequence::default(), 100);

        let error = allocator
            .allocate(&ledger, &user(), Some("ESPECIAL"))
            .await
            .expect_err("must exhaust");

        assert!(matches!(
            error,
            AllocationError::Exhausted { attempts: 100, ref last_attempt } if last_attempt == "ESPECIAL"
        ));
    }

    #[tokio::test]
    async fn suggestion_skips_taken_folios() {
        let ledger = FixedLedger::new(Some("CIC-00003"), &["CIC-00003", "CIC-00004"]);
        let suggestion = FolioAllocator::default()
            .suggest_after(&ledger, &user(), "CIC-00003")
            .await
            .expect("lookup");

        assert_eq!(suggestion.as_deref(), Some("CIC-00005"));
    }
}
