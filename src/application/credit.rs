use super::deadline::Deadline;
use crate::config::CreditSettings;
use crate::domain::account::{EntryKind, OverdraftPolicy};
use crate::domain::credit::Credit;
use crate::domain::events::LedgerEvent;
use crate::domain::ids::{AccountId, CreditId, ScheduleEntryId, UserId};
use crate::domain::ports::{AccountStoreRef, CreditStoreRef, NotifierRef, RateSourceRef};
use crate::domain::schedule::ScheduleEntry;
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{info, warn};

/// Issues credits and serves their schedules.
pub struct CreditIssuer {
    accounts: AccountStoreRef,
    credits: CreditStoreRef,
    notifier: NotifierRef,
    rates: RateSourceRef,
    settings: CreditSettings,
    overdraft: OverdraftPolicy,
}

impl CreditIssuer {
    pub fn new(
        accounts: AccountStoreRef,
        credits: CreditStoreRef,
        notifier: NotifierRef,
        rates: RateSourceRef,
        settings: CreditSettings,
        overdraft: OverdraftPolicy,
    ) -> Self {
        Self {
            accounts,
            credits,
            notifier,
            rates,
            settings,
            overdraft,
        }
    }

    /// Creates a credit and its full amortization schedule in one store
    /// transaction.
    ///
    /// # Errors
    ///
    /// * `ValidationError` for a non-positive principal, a negative rate, or
    ///   a funding account owned by someone else.
    /// * `NotFound` when the funding account does not exist.
    pub async fn apply_for_credit(
        &self,
        user: UserId,
        account_id: AccountId,
        principal: Decimal,
        annual_rate: Decimal,
        deadline: Deadline,
    ) -> Result<Credit> {
        let (credit, schedule) =
            Credit::issue(user, account_id, principal, annual_rate, self.settings.term_months)?;

        let account = deadline
            .run("load funding account", self.accounts.get(account_id))
            .await?
            .ok_or_else(|| LedgerError::not_found("Account", account_id))?;
        if account.owner != user {
            return Err(LedgerError::validation(format!(
                "account {} does not belong to user {}",
                account_id, user
            )));
        }

        deadline
            .run(
                "issue credit",
                self.credits.insert_credit(credit.clone(), schedule),
            )
            .await?;

        info!(
            credit_id = %credit.id,
            %user,
            principal = %credit.principal,
            rate = %credit.annual_rate,
            payment = %credit.monthly_payment,
            "credit issued"
        );
        Ok(credit)
    }

    /// Like [`apply_for_credit`](Self::apply_for_credit), priced at the
    /// reference key rate plus the bank margin.
    ///
    /// The rate lookup gets half of the remaining budget. If it fails or
    /// runs out, `fallback_rate` is used instead.
    pub async fn apply_at_reference_rate(
        &self,
        user: UserId,
        account_id: AccountId,
        principal: Decimal,
        fallback_rate: Decimal,
        deadline: Deadline,
    ) -> Result<Credit> {
        let lookup = Deadline::after(deadline.remaining() / 2);
        let rate = match lookup.run("key rate lookup", self.rates.key_rate()).await {
            Ok(key_rate) => key_rate + self.settings.reference_rate_margin,
            Err(e) => {
                warn!(%fallback_rate, "reference rate unavailable, using fallback: {}", e);
                fallback_rate
            }
        };
        self.apply_for_credit(user, account_id, principal, rate, deadline)
            .await
    }

    pub async fn get_credit(&self, id: CreditId, deadline: Deadline) -> Result<Credit> {
        deadline
            .run("get credit", self.credits.get_credit(id))
            .await?
            .ok_or_else(|| LedgerError::not_found("Credit", id))
    }

    pub async fn credits_for_user(&self, user: UserId, deadline: Deadline) -> Result<Vec<Credit>> {
        deadline
            .run("list credits", self.credits.credits_for_user(user))
            .await
    }

    /// Schedule entries of a credit, ordered by due date.
    pub async fn get_schedule(&self, credit_id: CreditId, deadline: Deadline) -> Result<Vec<ScheduleEntry>> {
        deadline
            .run("get schedule", async {
                if self.credits.get_credit(credit_id).await?.is_none() {
                    return Err(LedgerError::not_found("Credit", credit_id));
                }
                self.credits.schedule_for(credit_id).await
            })
            .await
    }

    pub async fn due_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        deadline: Deadline,
    ) -> Result<Vec<ScheduleEntry>> {
        if to < from {
            return Err(LedgerError::validation("due range end precedes its start"));
        }
        deadline
            .run("due between", self.credits.due_between(from, to))
            .await
    }

    /// Pays one installment from `from_account` before the overdue
    /// processor gets to it.
    pub async fn pay_installment(
        &self,
        entry_id: ScheduleEntryId,
        from_account: AccountId,
        deadline: Deadline,
    ) -> Result<ScheduleEntry> {
        let result = deadline
            .run(
                "pay installment",
                self.credits
                    .settle_installment(entry_id, from_account, self.overdraft, Utc::now()),
            )
            .await;

        match result {
            Ok(entry) => {
                info!(%entry_id, credit_id = %entry.credit_id, amount = %entry.amount, "installment paid");
                self.notifier.notify(LedgerEvent::PaymentCompleted {
                    account_id: from_account,
                    amount: entry.amount,
                    kind: EntryKind::InstallmentPayment,
                });
                Ok(entry)
            }
            Err(e) => {
                warn!(%entry_id, %from_account, "installment payment failed: {}", e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::Account;
    use crate::domain::money::{Balance, Currency};
    use crate::domain::ports::AccountStore;
    use crate::domain::schedule::PaymentStatus;
    use crate::infrastructure::in_memory::InMemoryStore;
    use crate::infrastructure::notify::{ChannelNotifier, TracingNotifier};
    use crate::infrastructure::rates::FixedRateSource;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use std::time::Duration;

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(5))
    }

    fn issuer(store: &InMemoryStore, rates: FixedRateSource) -> CreditIssuer {
        CreditIssuer::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(TracingNotifier),
            Arc::new(rates),
            CreditSettings::default(),
            OverdraftPolicy::Forbid,
        )
    }

    async fn open(store: &InMemoryStore, owner: UserId, balance: Decimal) -> Account {
        let account = Account::open(owner, Currency::new("RUB").unwrap(), Balance::new(balance)).unwrap();
        store.insert(account.clone()).await.unwrap();
        account
    }

    #[tokio::test]
    async fn test_apply_for_credit_creates_full_schedule() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        let account = open(&store, user, dec!(0)).await;
        let issuer = issuer(&store, FixedRateSource::new(dec!(16)));

        let credit = issuer
            .apply_for_credit(user, account.id, dec!(1200), dec!(12), deadline())
            .await
            .unwrap();
        assert_eq!(credit.monthly_payment, dec!(106.62));
        assert_eq!(credit.outstanding, dec!(1279.44));

        let schedule = issuer.get_schedule(credit.id, deadline()).await.unwrap();
        assert_eq!(schedule.len(), 12);
        assert!(schedule.windows(2).all(|w| w[0].due_date < w[1].due_date));
        assert!(schedule.iter().all(|e| e.amount == dec!(106.62)));
        assert!(schedule.iter().all(|e| e.status == PaymentStatus::Unpaid));

        let mine = issuer.credits_for_user(user, deadline()).await.unwrap();
        assert_eq!(mine, vec![credit]);
    }

    #[tokio::test]
    async fn test_apply_for_credit_rejections() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        let account = open(&store, user, dec!(0)).await;
        let issuer = issuer(&store, FixedRateSource::new(dec!(16)));

        let missing = issuer
            .apply_for_credit(user, AccountId::new(), dec!(100), dec!(5), deadline())
            .await;
        assert!(matches!(missing, Err(LedgerError::NotFound { .. })));

        let foreign = issuer
            .apply_for_credit(UserId::new(), account.id, dec!(100), dec!(5), deadline())
            .await;
        assert!(matches!(foreign, Err(LedgerError::ValidationError(_))));

        let zero = issuer
            .apply_for_credit(user, account.id, dec!(0), dec!(5), deadline())
            .await;
        assert!(matches!(zero, Err(LedgerError::ValidationError(_))));

        let negative_rate = issuer
            .apply_for_credit(user, account.id, dec!(100), dec!(-1), deadline())
            .await;
        assert!(matches!(negative_rate, Err(LedgerError::ValidationError(_))));

        assert!(issuer.credits_for_user(user, deadline()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reference_rate_adds_margin_or_falls_back() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        let account = open(&store, user, dec!(0)).await;

        let priced = issuer(&store, FixedRateSource::new(dec!(16)))
            .apply_at_reference_rate(user, account.id, dec!(1000), dec!(30), deadline())
            .await
            .unwrap();
        assert_eq!(priced.annual_rate, dec!(21));

        let fallback = issuer(&store, FixedRateSource::unavailable())
            .apply_at_reference_rate(user, account.id, dec!(1000), dec!(30), deadline())
            .await
            .unwrap();
        assert_eq!(fallback.annual_rate, dec!(30));
    }

    #[tokio::test]
    async fn test_get_schedule_unknown_credit() {
        let store = InMemoryStore::new();
        let issuer = issuer(&store, FixedRateSource::new(dec!(16)));
        let result = issuer.get_schedule(CreditId::new(), deadline()).await;
        assert!(matches!(result, Err(LedgerError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_pay_installment() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        let account = open(&store, user, dec!(500)).await;
        let (notifier, mut events) = ChannelNotifier::new(8);
        let issuer = CreditIssuer::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(notifier),
            Arc::new(FixedRateSource::new(dec!(16))),
            CreditSettings::default(),
            OverdraftPolicy::Forbid,
        );

        let credit = issuer
            .apply_for_credit(user, account.id, dec!(1200), dec!(0), deadline())
            .await
            .unwrap();
        let first = issuer.get_schedule(credit.id, deadline()).await.unwrap()[0].clone();

        let paid = issuer.pay_installment(first.id, account.id, deadline()).await.unwrap();
        assert!(paid.status.is_paid());
        assert_eq!(
            events.recv().await.unwrap(),
            LedgerEvent::PaymentCompleted {
                account_id: account.id,
                amount: dec!(100),
                kind: EntryKind::InstallmentPayment,
            }
        );

        let account = store.get(account.id).await.unwrap().unwrap();
        assert_eq!(account.balance, Balance::new(dec!(400)));
        let credit = issuer.get_credit(credit.id, deadline()).await.unwrap();
        assert_eq!(credit.outstanding, dec!(1100));

        let again = issuer.pay_installment(first.id, account.id, deadline()).await;
        assert!(matches!(again, Err(LedgerError::ValidationError(_))));
        let account = store.get(account.id).await.unwrap().unwrap();
        assert_eq!(account.balance, Balance::new(dec!(400)));
    }

    #[tokio::test]
    async fn test_due_between_window() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        let account = open(&store, user, dec!(0)).await;
        let issuer = issuer(&store, FixedRateSource::new(dec!(16)));
        let credit = issuer
            .apply_for_credit(user, account.id, dec!(1200), dec!(0), deadline())
            .await
            .unwrap();

        let schedule = issuer.get_schedule(credit.id, deadline()).await.unwrap();
        let window = issuer
            .due_between(schedule[0].due_date, schedule[3].due_date, deadline())
            .await
            .unwrap();
        assert_eq!(window.len(), 3);

        let backwards = issuer
            .due_between(schedule[3].due_date, schedule[0].due_date, deadline())
            .await;
        assert!(matches!(backwards, Err(LedgerError::ValidationError(_))));
    }
}
