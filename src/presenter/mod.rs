//! Presentation layer: the reflection prompt, the alternatives view and notices

use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;
use tracing::debug;

use crate::alternatives::MarketplaceLinks;
use crate::models::{AlternativesChoice, Notice, ProductInfo, UserChoice};
use crate::traits::Presenter;

/// Asks on the terminal
pub struct TerminalPresenter {
    alternatives: MarketplaceLinks,
    input: Mutex<Lines<BufReader<Stdin>>>,
}

impl TerminalPresenter {
    pub fn new(alternatives: MarketplaceLinks) -> Self {
        Self {
            alternatives,
            input: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }

    /// Read answers until one maps to a choice; closed input abandons the prompt
    async fn ask<T: Copy>(&self, question: &str, options: &[(&str, T)]) -> Result<T> {
        let mut input = self.input.lock().await;

        loop {
            println!("{question}");
            let Some(line) = input.next_line().await? else {
                return Err(anyhow::anyhow!("Input closed before a choice was made"));
            };

            let answer = line.trim().to_lowercase();
            if let Some((_, choice)) = options.iter().find(|(key, _)| answer.starts_with(key)) {
                return Ok(*choice);
            }
            debug!("Unrecognized answer: {}", answer);
        }
    }
}

#[async_trait]
impl Presenter for TerminalPresenter {
    async fn prompt_user(&self, product: &ProductInfo) -> Result<UserChoice> {
        println!();
        println!("Do I Need That?");
        println!("Take a moment to reflect on this purchase.");
        if product.price.is_empty() {
            println!("  {}", product.display_title());
        } else {
            println!("  {} - {}", product.display_title(), product.price);
        }

        self.ask(
            "[y] Yes, I need it   [a] Show me alternatives   [n] No, I'll skip it",
            &[
                ("y", UserChoice::Proceed),
                ("a", UserChoice::ViewAlternatives),
                ("n", UserChoice::Decline),
            ],
        )
        .await
    }

    async fn show_alternatives(&self, product: &ProductInfo) -> Result<AlternativesChoice> {
        println!();
        println!("Second-hand alternatives for {}", product.display_title());
        for alternative in self.alternatives.for_product(product) {
            match (alternative.price_low, alternative.price_high) {
                (Some(low), Some(high)) => println!(
                    "  {} (about ${:.2} - ${:.2}): {}",
                    alternative.marketplace, low, high, alternative.search_url
                ),
                _ => println!("  {}: {}", alternative.marketplace, alternative.search_url),
            }
        }

        self.ask(
            "[c] Continue with original purchase   [s] Skip this purchase",
            &[
                ("c", AlternativesChoice::Proceed),
                ("s", AlternativesChoice::Decline),
            ],
        )
        .await
    }

    async fn show_notice(&self, notice: &Notice) {
        match notice {
            Notice::PurchaseSkipped => {
                println!("Good choice! You just helped reduce consumption and waste.");
            }
            Notice::ResumeFailed(reason) => {
                println!("Could not continue with the original purchase: {reason}");
            }
        }
    }
}

/// Answers every prompt the same way; for unattended runs
pub struct ScriptedPresenter {
    choice: UserChoice,
    after_alternatives: AlternativesChoice,
    prompts: AtomicUsize,
    notices: Mutex<Vec<Notice>>,
}

impl ScriptedPresenter {
    pub fn new(choice: UserChoice, after_alternatives: AlternativesChoice) -> Self {
        Self {
            choice,
            after_alternatives,
            prompts: AtomicUsize::new(0),
            notices: Mutex::new(Vec::new()),
        }
    }

    /// Reflection prompts opened so far
    pub fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }

    pub async fn notices(&self) -> Vec<Notice> {
        self.notices.lock().await.clone()
    }
}

#[async_trait]
impl Presenter for ScriptedPresenter {
    async fn prompt_user(&self, product: &ProductInfo) -> Result<UserChoice> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        debug!("Answering prompt for {} with {:?}", product.display_title(), self.choice);
        Ok(self.choice)
    }

    async fn show_alternatives(&self, _product: &ProductInfo) -> Result<AlternativesChoice> {
        Ok(self.after_alternatives)
    }

    async fn show_notice(&self, notice: &Notice) {
        self.notices.lock().await.push(notice.clone());
    }
}
