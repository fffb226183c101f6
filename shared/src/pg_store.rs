//! Postgres implementation of the participant protocol, stamped out per service.
//!
//! Each participant owns three tables: the resource (`id`, `amount`), a scratch
//! table keyed by `biz_id` holding what `try` reserved, and an `event` table
//! with one row per `biz_id`. Diesel tables are distinct types, so the store is
//! generated from the service's schema rather than written generically.
//!
//! ```ignore
//! shared::pg_participant_store! {
//!     /// Account balances reserved per purchase, backed by Postgres.
//!     pub struct PgAccountStore {
//!         kind: ResourceKind::Account,
//!         resource: account(user_id, balance),
//!         scratch: account_tmp,
//!         event: event,
//!     }
//! }
//! ```

#[macro_export]
macro_rules! pg_participant_store {
    (
        $(#[$meta:meta])*
        $vis:vis struct $store:ident {
            kind: $kind:expr,
            resource: $resource:ident($resource_id:ident, $amount:ident),
            scratch: $scratch:ident,
            event: $event:ident $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $store {
            pool: $crate::db::DbPool,
        }

        impl $store {
            pub fn new(pool: $crate::db::DbPool) -> Self {
                Self { pool }
            }

            /// Reads the event row for `biz_id` and holds its row lock until commit.
            async fn lock_event(
                conn: &mut ::diesel_async::AsyncPgConnection,
                biz_id: $crate::BizId,
            ) -> ::std::result::Result<::std::option::Option<(i64, i32)>, $crate::ParticipantError> {
                use ::diesel::prelude::*;
                use ::diesel_async::RunQueryDsl;

                let existing = $event::table
                    .select(($event::id, $event::status))
                    .filter($event::biz_id.eq(biz_id))
                    .for_update()
                    .first::<(i64, i32)>(conn)
                    .await
                    .optional()?;
                Ok(existing)
            }
        }

        #[::async_trait::async_trait]
        impl $crate::ParticipantStore for $store {
            fn kind(&self) -> $crate::ResourceKind {
                $kind
            }

            async fn try_reserve(
                &self,
                biz: &$crate::BizData,
            ) -> ::std::result::Result<$crate::TryOutcome, $crate::ParticipantError> {
                use ::diesel::prelude::*;
                use ::diesel_async::{AsyncConnection, RunQueryDsl};
                use $crate::{ParticipantError, ParticipantStatus, TryOutcome};

                let mut conn = self.pool.get().await?;
                let biz_id = biz.biz_id();
                let reservation = ($kind).reservation(biz);

                let result = conn
                    .transaction::<_, ParticipantError, _>(|conn| {
                        Box::pin(async move {
                            ::diesel::insert_into($event::table)
                                .values((
                                    $event::biz_id.eq(biz_id),
                                    $event::status.eq(ParticipantStatus::Tried.code()),
                                ))
                                .execute(conn)
                                .await?;

                            let updated = ::diesel::update(
                                $resource::table
                                    .filter($resource::$resource_id.eq(reservation.resource_id))
                                    .filter($resource::$amount.ge(reservation.amount)),
                            )
                            .set($resource::$amount.eq($resource::$amount - reservation.amount))
                            .execute(conn)
                            .await?;
                            if updated == 0 {
                                return Err(ParticipantError::Insufficient {
                                    resource_id: reservation.resource_id,
                                    requested: reservation.amount,
                                });
                            }

                            ::diesel::insert_into($scratch::table)
                                .values((
                                    $scratch::biz_id.eq(biz_id),
                                    $scratch::amount.eq(reservation.amount),
                                ))
                                .execute(conn)
                                .await?;

                            Ok(TryOutcome::Reserved)
                        })
                    })
                    .await;

                match result {
                    Err(ParticipantError::Database(ref e)) if $crate::db::is_duplicate(e) => {
                        Ok(TryOutcome::AlreadyRecorded)
                    }
                    other => other,
                }
            }

            async fn cancel(
                &self,
                biz: &$crate::BizData,
            ) -> ::std::result::Result<$crate::CancelOutcome, $crate::ParticipantError> {
                use ::diesel::prelude::*;
                use ::diesel_async::{AsyncConnection, RunQueryDsl};
                use $crate::{CancelOutcome, ParticipantError, ParticipantStatus};

                let mut conn = self.pool.get().await?;
                let biz_id = biz.biz_id();
                let reservation = ($kind).reservation(biz);

                let result = conn
                    .transaction::<_, ParticipantError, _>(|conn| {
                        Box::pin(async move {
                            let Some((id, code)) = Self::lock_event(conn, biz_id).await? else {
                                ::diesel::insert_into($event::table)
                                    .values((
                                        $event::biz_id.eq(biz_id),
                                        $event::status.eq(ParticipantStatus::Canceled.code()),
                                    ))
                                    .execute(conn)
                                    .await?;
                                return Ok(CancelOutcome::Preempted);
                            };

                            let status = ParticipantStatus::try_from(code)?;
                            if status != ParticipantStatus::Tried {
                                return Ok(CancelOutcome::Unchanged(status));
                            }

                            let released = ::diesel::delete(
                                $scratch::table.filter($scratch::biz_id.eq(biz_id)),
                            )
                            .returning($scratch::amount)
                            .get_result::<i64>(conn)
                            .await
                            .optional()?
                            .unwrap_or(0);

                            ::diesel::update(
                                $resource::table
                                    .filter($resource::$resource_id.eq(reservation.resource_id)),
                            )
                            .set($resource::$amount.eq($resource::$amount + released))
                            .execute(conn)
                            .await?;

                            ::diesel::update($event::table.filter($event::id.eq(id)))
                                .set($event::status.eq(ParticipantStatus::Canceled.code()))
                                .execute(conn)
                                .await?;

                            Ok(CancelOutcome::Released)
                        })
                    })
                    .await;

                // A try committed between the lookup and the pre-emptive insert.
                match result {
                    Err(ParticipantError::Database(ref e)) if $crate::db::is_duplicate(e) => {
                        Err(ParticipantError::Contended(biz_id))
                    }
                    other => other,
                }
            }

            async fn confirm(
                &self,
                biz: &$crate::BizData,
            ) -> ::std::result::Result<$crate::ConfirmOutcome, $crate::ParticipantError> {
                use ::diesel::prelude::*;
                use ::diesel_async::{AsyncConnection, RunQueryDsl};
                use $crate::{ConfirmOutcome, ParticipantError, ParticipantStatus};

                let mut conn = self.pool.get().await?;
                let biz_id = biz.biz_id();

                conn.transaction::<_, ParticipantError, _>(|conn| {
                    Box::pin(async move {
                        let Some((id, code)) = Self::lock_event(conn, biz_id).await? else {
                            return Ok(ConfirmOutcome::Unchanged(None));
                        };

                        let status = ParticipantStatus::try_from(code)?;
                        if status != ParticipantStatus::Tried {
                            return Ok(ConfirmOutcome::Unchanged(Some(status)));
                        }

                        ::diesel::delete($scratch::table.filter($scratch::biz_id.eq(biz_id)))
                            .execute(conn)
                            .await?;

                        ::diesel::update($event::table.filter($event::id.eq(id)))
                            .set($event::status.eq(ParticipantStatus::Confirmed.code()))
                            .execute(conn)
                            .await?;

                        Ok(ConfirmOutcome::Committed)
                    })
                })
                .await
            }
        }
    };
}
