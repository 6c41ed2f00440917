// Roadside market: collect proceeds, post wheat offers, keep an advert up.
use std::time::Duration;

use crate::agent_engine::engine::WorkflowEngine;
use crate::agent_engine::event_bus::EngineEvent;
use crate::agent_engine::loop_control::{Attempt, RetryPolicy};
use crate::errors::{HayBotError, HayBotResult};
use crate::perception::location::Location;
use crate::perception::names;
use crate::perception::types::ScreenFrame;

/// An increment button with a distinct look once its maximum is reached.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MaxButton {
    pub label: &'static str,
    pub active: &'static str,
    pub inactive: &'static str,
    pub active_threshold: f32,
    pub inactive_threshold: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollVerdict {
    Maxed,
    Press,
    Wait,
}

/// Decides one poll of a maximize loop from the two confidences.
fn poll_verdict(active: f32, inactive: f32, button: &MaxButton, ambiguous: f32) -> PollVerdict {
    if inactive >= button.inactive_threshold && inactive > active {
        PollVerdict::Maxed
    } else if active >= button.active_threshold && active > inactive {
        PollVerdict::Press
    } else if inactive > ambiguous && inactive > active {
        PollVerdict::Maxed
    } else if active > ambiguous && active > inactive {
        PollVerdict::Press
    } else {
        PollVerdict::Wait
    }
}

impl WorkflowEngine {
    /// Full market visit. Failures other than cancellation are contained
    /// here and reported as `false`.
    pub(crate) async fn market_workflow(&self) -> HayBotResult<bool> {
        let result = self.market_visit().await;
        self.contain("market workflow", result)
    }

    async fn market_visit(&self) -> HayBotResult<bool> {
        let t = self.cfg().thresholds.clone();
        let frame = self.capture_past_loading().await?;

        match self.classify(&frame).await?.map(|c| c.location) {
            Some(Location::Offer) => {
                tracing::info!("offer dialog open; closing it first");
                if self.click_template(&frame, names::CLOSE, t.close_button).await? {
                    self.pause(self.cfg().timing.market_ui_wait).await?;
                }
            }
            Some(Location::Market) => tracing::info!("already in market"),
            _ => {
                if !self.go_to_market(&frame).await? {
                    tracing::warn!("failed to open market");
                    return Ok(false);
                }
            }
        }

        let collected = self.collect_sold_items().await?;
        let slots_filled = self.fill_market().await?;
        let frame = self.capture().await?;
        if let Err(e) = self.check_and_create_advertisement(&frame).await {
            if matches!(e, HayBotError::Cancelled) {
                return Err(e);
            }
            tracing::warn!(error = %e, "advertisement check failed; continuing");
        }
        let frame = self.capture().await?;
        if !self.close_market(&frame).await? {
            tracing::warn!("market may still be open");
        }

        let wheat_sold = self.ctx.state.bot().wheat_sold_this_session;
        tracing::info!(collected, slots_filled, wheat_sold, "market visit finished");
        self.ctx.events.emit(EngineEvent::MarketVisit {
            collected,
            slots_filled,
            wheat_sold,
        });
        Ok(true)
    }

    pub(crate) async fn is_in_market(&self, frame: &ScreenFrame) -> HayBotResult<bool> {
        let hit = self
            .find(frame, names::MARKET, self.cfg().thresholds.market_page)
            .await?;
        Ok(hit.found())
    }

    async fn go_to_market(&self, frame: &ScreenFrame) -> HayBotResult<bool> {
        let frame = if self.dismiss_loading(frame).await? {
            self.capture().await?
        } else {
            frame.clone()
        };
        if !self
            .click_template(&frame, names::MARKET_BUTTON, self.cfg().thresholds.market_button)
            .await?
        {
            tracing::warn!("market button not found");
            return Ok(false);
        }

        let poll = self.cfg().timing.market_load_poll;
        let opened = RetryPolicy::new(self.cfg().retries.market_load, Duration::ZERO)
            .run(&self.ctx.stop, move |_| async move {
                self.pause(poll).await?;
                let frame = self.capture().await?;
                let frame = if self.dismiss_loading(&frame).await? {
                    self.capture().await?
                } else {
                    frame
                };
                Ok(if self.is_in_market(&frame).await? {
                    Attempt::Done(())
                } else {
                    Attempt::Retry
                })
            })
            .await?;
        if opened.is_none() {
            tracing::warn!("market did not open after clicking its button");
        }
        Ok(opened.is_some())
    }

    /// Clicks collect/sold affordances until a round finds none.
    async fn collect_sold_items(&self) -> HayBotResult<u32> {
        let t = self.cfg().thresholds.clone();
        let wait = self.cfg().timing.market_button_wait;
        let mut total = 0;
        for round in 0..self.cfg().retries.collect_rounds {
            let mut this_round = 0;
            for (name, threshold) in [(names::COLLECT, t.collect_button), (names::SOLD, t.sold_items)] {
                let frame = self.capture().await?;
                if self.click_template(&frame, name, threshold).await? {
                    self.pause(wait).await?;
                    this_round += 1;
                }
            }
            if this_round == 0 {
                break;
            }
            tracing::debug!(round = round + 1, this_round, "collected sold items");
            total += this_round;
        }
        if total > 0 {
            tracing::info!(total, "sold items collected");
        }
        Ok(total)
    }

    /// Posts wheat into free slots until none remain or one fails.
    async fn fill_market(&self) -> HayBotResult<u32> {
        let mut filled = 0;
        for slot in 0..self.cfg().retries.market_slots {
            let frame = self.capture().await?;
            let free = self
                .find(&frame, names::NEW_OFFER, self.cfg().thresholds.new_offer)
                .await?;
            let Some(at) = free.location else {
                tracing::info!(filled, "no free market slot");
                break;
            };
            if !self.safe_click(at, names::NEW_OFFER).await? {
                break;
            }
            if !self.create_wheat_offer().await? {
                tracing::info!(slot, "offer not created; stopping fill");
                break;
            }
            filled += 1;
            self.pause(self.cfg().timing.market_step_delay).await?;
        }
        Ok(filled)
    }

    /// Fills the open offer dialog with maximum wheat at maximum price.
    async fn create_wheat_offer(&self) -> HayBotResult<bool> {
        let t = self.cfg().thresholds.clone();
        let timing = self.cfg().timing.clone();
        self.pause(timing.market_ui_wait).await?;

        let frame = self.capture().await?;
        if !self.click_template(&frame, names::WHEAT_MARKET, t.wheat_market).await? {
            tracing::info!("no wheat to sell; closing offer dialog");
            if self.click_template(&frame, names::CLOSE, t.close_button).await? {
                self.pause(timing.market_ui_wait).await?;
            }
            return Ok(false);
        }
        self.pause(timing.market_step_delay).await?;

        let quantity = MaxButton {
            label: "quantity",
            active: names::PLUS_ACTIVE,
            inactive: names::PLUS_INACTIVE,
            active_threshold: t.plus_active,
            inactive_threshold: t.plus_inactive,
        };
        let price = MaxButton {
            label: "price",
            active: names::ARROW_ACTIVE,
            inactive: names::ARROW_INACTIVE,
            active_threshold: t.arrow_active,
            inactive_threshold: t.arrow_inactive,
        };
        self.maximize(&quantity).await?;
        self.maximize(&price).await?;

        let frame = self.capture().await?;
        if self.click_template(&frame, names::NEWSPAPER, t.newspaper).await? {
            self.pause(timing.market_step_delay).await?;
        }

        let frame = self.capture().await?;
        if !self.click_template(&frame, names::INSERT_BUTTON, t.insert_button).await? {
            tracing::warn!("insert button not found");
            return Ok(false);
        }
        self.pause(timing.market_ui_wait).await?;
        self.ctx.state.update_bot(|b| b.wheat_sold_this_session = true);
        tracing::info!("wheat offer posted");
        Ok(true)
    }

    /// Presses `button` until it shows its maxed look; bounded polling.
    pub(crate) async fn maximize(&self, button: &MaxButton) -> HayBotResult<bool> {
        let ambiguous = self.cfg().thresholds.ambiguous_button;
        let step = self.cfg().timing.market_step_delay;
        let lookup = button.active_threshold.min(ambiguous);
        let maxed = RetryPolicy::new(self.cfg().retries.button_polls, Duration::ZERO)
            .run(&self.ctx.stop, move |poll| async move {
                self.pause(step).await?;
                let frame = self.capture().await?;
                let inactive = self.find(&frame, button.inactive, button.inactive_threshold).await?;
                let active = self.find(&frame, button.active, lookup).await?;
                match poll_verdict(active.confidence, inactive.confidence, button, ambiguous) {
                    PollVerdict::Maxed => {
                        tracing::debug!(button = button.label, poll, "maximum reached");
                        Ok(Attempt::Done(()))
                    }
                    PollVerdict::Press => {
                        if let Some(at) = active.location {
                            self.safe_click(at, button.active).await?;
                        }
                        Ok(Attempt::Retry)
                    }
                    PollVerdict::Wait => {
                        tracing::debug!(
                            button = button.label,
                            active = active.confidence,
                            inactive = inactive.confidence,
                            "button state unclear"
                        );
                        self.pause(step).await?;
                        Ok(Attempt::Retry)
                    }
                }
            })
            .await?;
        if maxed.is_none() {
            tracing::warn!(button = button.label, "maximum not confirmed within poll bound");
        }
        Ok(maxed.is_some())
    }

    /// `true` when an advert is already running, cooling down, or was just
    /// created.
    async fn check_and_create_advertisement(&self, frame: &ScreenFrame) -> HayBotResult<bool> {
        let t = self.cfg().thresholds.clone();
        if self.find(frame, names::CHECK_PAPER, t.check_paper).await?.found() {
            tracing::info!("advertisement already active");
            return Ok(true);
        }
        if self.find(frame, names::PAPER_COOLDOWN, t.paper_cooldown).await?.found() {
            tracing::info!("advertisement on cooldown");
            return Ok(true);
        }
        self.create_advertisement(frame).await
    }

    async fn create_advertisement(&self, frame: &ScreenFrame) -> HayBotResult<bool> {
        let t = self.cfg().thresholds.clone();
        let wait = self.cfg().timing.market_ui_wait;

        let entries = [
            (names::OFFER, t.advert_offer),
            (names::WHEAT_MARKET, t.advert_wheat_offer),
            (names::NEW_OFFER, t.advert_new_offer),
        ];
        let mut opened = false;
        for (name, threshold) in entries {
            if self.click_template(frame, name, threshold).await? {
                opened = true;
                break;
            }
        }
        if !opened {
            tracing::info!("no offer to advertise");
            return Ok(false);
        }
        self.pause(wait).await?;

        let frame = self.capture().await?;
        if !self.find(&frame, names::PAPER_PAGE, t.paper_page).await?.found() {
            tracing::warn!("advertisement page did not open");
            return Ok(false);
        }
        if self.find(&frame, names::PAPER_COOLDOWN, t.paper_cooldown).await?.found() {
            tracing::info!("advertisement on cooldown; closing page");
            if self.click_template(&frame, names::CLOSE, t.close_button).await? {
                self.pause(wait).await?;
            }
            return Ok(true);
        }
        if !self.click_template(&frame, names::PAPER_BUTTON, t.paper_button).await? {
            tracing::warn!("advertise button not found");
            return Ok(false);
        }
        self.pause(wait).await?;

        let frame = self.capture().await?;
        if !self.click_template(&frame, names::PAPER_CREATE, t.paper_create).await? {
            tracing::warn!("create advertisement button not found");
            return Ok(false);
        }
        self.pause(wait).await?;
        tracing::info!("advertisement created");
        Ok(true)
    }

    pub(crate) async fn close_market(&self, frame: &ScreenFrame) -> HayBotResult<bool> {
        if !self
            .click_template(frame, names::CLOSE, self.cfg().thresholds.close_button)
            .await?
        {
            tracing::warn!("market close button not found");
            return Ok(false);
        }
        self.pause(self.cfg().timing.market_ui_wait).await?;
        let frame = self.capture().await?;
        Ok(!self.is_in_market(&frame).await?)
    }

    /// One market check while crops grow. Errors other than cancellation
    /// are logged and the growth wait continues.
    pub(crate) async fn tend_market_during_growth(&self) -> HayBotResult<()> {
        match self.tend_market().await {
            Err(HayBotError::Cancelled) => Err(HayBotError::Cancelled),
            Err(e) => {
                tracing::warn!(error = %e, "market check during growth failed");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    async fn tend_market(&self) -> HayBotResult<()> {
        let t = self.cfg().thresholds.clone();
        let frame = self.capture_past_loading().await?;
        if self.find(&frame, names::COLLECT, t.collect_button).await?.found() {
            tracing::info!("sold items visible during growth");
            self.market_workflow().await?;
            return Ok(());
        }

        if !self.go_to_market(&frame).await? {
            return Ok(());
        }
        self.pause(self.cfg().timing.market_ui_wait).await?;
        let frame = self.capture().await?;
        if !self.is_in_market(&frame).await? {
            tracing::warn!("market not confirmed during growth check");
            return Ok(());
        }

        self.collect_sold_items().await?;
        let frame = self.capture().await?;
        if self.find(&frame, names::NEW_OFFER, t.new_offer).await?.found() {
            self.fill_market().await?;
        }
        let frame = self.capture().await?;
        if let Err(e) = self.check_and_create_advertisement(&frame).await {
            if matches!(e, HayBotError::Cancelled) {
                return Err(e);
            }
            tracing::warn!(error = %e, "advertisement check failed during growth");
        }
        let frame = self.capture().await?;
        self.close_market(&frame).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_engine::testkit::{FakeGame, Page};

    fn plus(engine: &WorkflowEngine) -> MaxButton {
        let t = &engine.cfg().thresholds;
        MaxButton {
            label: "quantity",
            active: names::PLUS_ACTIVE,
            inactive: names::PLUS_INACTIVE,
            active_threshold: t.plus_active,
            inactive_threshold: t.plus_inactive,
        }
    }

    #[test]
    fn verdict_prefers_the_stronger_look() {
        let b = MaxButton {
            label: "x",
            active: "a",
            inactive: "i",
            active_threshold: 0.7,
            inactive_threshold: 0.7,
        };
        assert_eq!(poll_verdict(0.3, 0.9, &b, 0.6), PollVerdict::Maxed);
        assert_eq!(poll_verdict(0.9, 0.3, &b, 0.6), PollVerdict::Press);
        assert_eq!(poll_verdict(0.3, 0.65, &b, 0.6), PollVerdict::Maxed);
        assert_eq!(poll_verdict(0.65, 0.3, &b, 0.6), PollVerdict::Press);
        assert_eq!(poll_verdict(0.5, 0.5, &b, 0.6), PollVerdict::Wait);
    }

    #[tokio::test]
    async fn maximize_presses_until_maxed() {
        let game = FakeGame::new(Page::Offer);
        game.with(|g| g.plus_presses_needed = 3);
        let engine = game.engine();
        assert!(engine.maximize(&plus(&engine)).await.unwrap());
        assert_eq!(game.with(|g| g.plus_presses), 3);
    }

    #[tokio::test]
    async fn maximize_is_bounded() {
        let game = FakeGame::new(Page::Offer);
        game.with(|g| g.plus_presses_needed = 1_000);
        let engine = game.engine();
        assert!(!engine.maximize(&plus(&engine)).await.unwrap());
        assert_eq!(game.with(|g| g.plus_presses), engine.cfg().retries.button_polls);
    }

    #[tokio::test]
    async fn visit_fills_every_free_slot() {
        let game = FakeGame::new(Page::Main);
        game.with(|g| {
            g.free_slots = 3;
            g.collect_pending = 1;
        });
        let engine = game.engine();
        assert!(engine.market_workflow().await.unwrap());
        assert_eq!(game.with(|g| (g.posted, g.free_slots, g.collect_pending)), (3, 0, 0));
        assert!(game.ctx.state.bot().wheat_sold_this_session);
        assert_eq!(game.with(|g| g.page), Page::Main);
    }

    #[tokio::test]
    async fn advert_is_created_when_none_is_running() {
        let game = FakeGame::new(Page::Main);
        game.with(|g| {
            g.free_slots = 1;
            g.advert_running = false;
        });
        let engine = game.engine();
        assert!(engine.market_workflow().await.unwrap());
        assert!(game.with(|g| g.advert_running));
        assert!(game.clicked(names::PAPER_CREATE));
    }

    #[tokio::test]
    async fn missing_market_button_fails_softly() {
        let game = FakeGame::new(Page::Blank);
        let engine = game.engine();
        assert!(!engine.market_workflow().await.unwrap());
    }

    #[tokio::test]
    async fn actuator_errors_are_contained_in_the_market() {
        let game = FakeGame::new(Page::Main);
        game.with(|g| g.fail_clicks = true);
        let engine = game.engine();
        assert!(!engine.market_workflow().await.unwrap());
    }
}
