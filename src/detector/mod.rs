//! Intent detection: finds purchase-commit controls and attaches exactly one
//! intercepting listener to each.
//!
//! `scan` is idempotent. The host calls it on load, on DOM-ready and after
//! every observed subtree mutation; a control already carrying a listener is
//! never attached twice. A control that drops out of the document loses its
//! listener together with its node and is re-attached if it comes back.

use std::collections::{HashMap, HashSet};

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, warn};

use crate::config::DetectorPatterns;
use crate::models::{ControlId, FormTarget, WatchedControl};
use crate::sites::{element_text, parse_selectors, resolve_href};
use crate::traits::PageDriver;

/// Elements considered by the keyword heuristics
const CANDIDATE_SELECTOR: &str =
    "button, input[type=submit], input[type=button], input[type=image], a, [role=button]";

/// What a single scan changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Purchase-commit controls present in the document
    pub found: usize,
    /// Listeners attached by this scan
    pub attached: usize,
    /// Watched controls whose node left the document
    pub detached: usize,
}

pub struct IntentDetector {
    patterns: DetectorPatterns,
    watched: HashMap<ControlId, WatchedControl>,
}

impl IntentDetector {
    pub fn new(patterns: DetectorPatterns) -> Self {
        Self {
            patterns,
            watched: HashMap::new(),
        }
    }

    /// Examine the current document and attach listeners to new controls
    ///
    /// # Arguments
    /// * `page` - The page to scan
    /// * `site_selectors` - Controls that always qualify on this site
    pub fn scan(&mut self, page: &dyn PageDriver, site_selectors: &[String]) -> ScanReport {
        let page_url = page.url();
        let html = page.html();

        // Keep the parsed document in this scope; only owned data leaves it
        let present = {
            let document = Html::parse_document(&html);
            self.find_controls(&document, &page_url, site_selectors)
        };

        let mut report = ScanReport {
            found: present.len(),
            ..ScanReport::default()
        };
        let present_ids: HashSet<ControlId> =
            present.iter().map(|control| control.control_id.clone()).collect();

        for control in present {
            let id = control.control_id.clone();
            if self.watched.get(&id).is_some_and(|known| known.listener_attached) {
                continue;
            }

            // A new or returning node: refresh what we know about it
            self.watched.insert(id.clone(), control);
            let Some(entry) = self.watched.get_mut(&id) else {
                continue;
            };

            match page.attach_listener(entry) {
                Ok(()) => {
                    entry.listener_attached = true;
                    report.attached += 1;
                    debug!("Listener attached to {} ({})", entry.control_id, entry.selector);
                }
                Err(e) => warn!("Failed to attach listener to {}: {}", entry.selector, e),
            }
        }

        // The listener lives on the node: a node that stays but stops
        // classifying keeps it, and must not get a second one later
        for control in self.watched.values_mut() {
            if control.listener_attached
                && !present_ids.contains(&control.control_id)
                && !page.is_connected(&control.selector)
            {
                control.listener_attached = false;
                report.detached += 1;
            }
        }

        if report.attached > 0 || report.detached > 0 {
            info!(
                "Scan of {} found {} purchase controls ({} attached, {} detached)",
                page_url, report.found, report.attached, report.detached
            );
        }

        report
    }

    pub fn control(&self, id: &ControlId) -> Option<&WatchedControl> {
        self.watched.get(id)
    }

    /// Controls currently carrying a listener, in document path order
    pub fn watched(&self) -> Vec<&WatchedControl> {
        let mut controls: Vec<_> = self
            .watched
            .values()
            .filter(|control| control.listener_attached)
            .collect();
        controls.sort_by(|a, b| a.selector.cmp(&b.selector));
        controls
    }

    fn find_controls(
        &self,
        document: &Html,
        page_url: &str,
        site_selectors: &[String],
    ) -> Vec<WatchedControl> {
        let mut seen = HashSet::new();
        let mut controls = Vec::new();

        let site_matches = parse_selectors(site_selectors)
            .into_iter()
            .flat_map(|selector| document.select(&selector).collect::<Vec<_>>())
            .map(|element| (element, true));

        let candidates = Selector::parse(CANDIDATE_SELECTOR)
            .map(|selector| document.select(&selector).collect::<Vec<_>>())
            .unwrap_or_default()
            .into_iter()
            .map(|element| (element, false));

        for (element, site_match) in site_matches.chain(candidates) {
            if self.is_own_ui(&element) {
                continue;
            }
            if !site_match && !self.classify(&element) {
                continue;
            }

            let control = describe(&element, page_url);
            if seen.insert(control.control_id.clone()) {
                controls.push(control);
            }
        }

        controls
    }

    /// Purchase-commit heuristic; anything ambiguous is not a purchase control
    pub fn classify(&self, element: &ElementRef<'_>) -> bool {
        let patterns = &self.patterns;
        let value = element.value();
        let tag = value.name().to_lowercase();

        let text = if tag == "input" {
            value.attr("value").unwrap_or_default().trim().to_lowercase()
        } else {
            element_text(element).to_lowercase()
        };
        if text.chars().count() <= patterns.max_text_len
            && patterns.text_terms.iter().any(|term| text.contains(&term.to_lowercase()))
        {
            return true;
        }

        let id = value.id().unwrap_or_default().to_lowercase();
        let classes = value.classes().collect::<Vec<_>>().join(" ").to_lowercase();
        if patterns.id_class_patterns.iter().any(|pattern| {
            let pattern = pattern.to_lowercase();
            id.contains(&pattern) || classes.contains(&pattern)
        }) {
            return true;
        }

        // A <button> without a type attribute is a submit button
        let kind = value
            .attr("type")
            .map(str::to_lowercase)
            .unwrap_or_else(|| if tag == "button" { "submit".to_string() } else { String::new() });
        if matches!(tag.as_str(), "button" | "input") && matches!(kind.as_str(), "submit" | "button")
        {
            let form_action = closest(element, "form")
                .and_then(|form| form.value().attr("action"))
                .unwrap_or_default()
                .to_lowercase();
            if patterns
                .form_action_terms
                .iter()
                .any(|term| form_action.contains(&term.to_lowercase()))
            {
                return true;
            }

            let name = value.attr("name").unwrap_or_default().to_lowercase();
            if patterns.name_terms.iter().any(|term| name.contains(&term.to_lowercase())) {
                return true;
            }
        }

        false
    }

    fn is_own_ui(&self, element: &ElementRef<'_>) -> bool {
        let prefix = self.patterns.own_ui_prefix.to_lowercase();
        if prefix.is_empty() {
            return false;
        }

        std::iter::once(*element)
            .chain(element.ancestors().filter_map(ElementRef::wrap))
            .filter_map(|el| el.value().id())
            .any(|id| id.to_lowercase().contains(&prefix))
    }
}

/// Build the watched-control record for a qualifying element
fn describe(element: &ElementRef<'_>, page_url: &str) -> WatchedControl {
    let value = element.value();
    let tag = value.name().to_lowercase();
    let selector = css_path(element);

    let identity = format!(
        "{selector}|{tag}|{}|{}",
        value.attr("name").unwrap_or_default(),
        value.attr("type").unwrap_or_default()
    );
    let control_id = ControlId(format!("{:x}", md5::compute(identity)));

    let form = closest(element, "form").map(|form| FormTarget {
        selector: css_path(&form),
        action: form.value().attr("action").map(str::to_string),
    });

    let href = std::iter::once(*element)
        .chain(element.ancestors().filter_map(ElementRef::wrap))
        .find(|el| el.value().name() == "a")
        .and_then(|anchor| anchor.value().attr("href"))
        .and_then(|href| resolve_href(page_url, href));

    WatchedControl {
        control_id,
        selector,
        tag,
        form,
        href,
        listener_attached: false,
    }
}

fn closest<'a>(element: &ElementRef<'a>, tag: &str) -> Option<ElementRef<'a>> {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == tag)
}

/// CSS path that locates the element again: anchored at the nearest id,
/// otherwise `tag:nth-child(n)` segments up to the root
pub fn css_path(element: &ElementRef<'_>) -> String {
    let mut segments = Vec::new();
    let mut current = Some(*element);

    while let Some(el) = current {
        let value = el.value();

        if let Some(id) = value.id() {
            segments.push(id_selector(id));
            break;
        }

        let tag = value.name();
        if tag == "html" {
            segments.push(tag.to_string());
            break;
        }

        let position = el
            .prev_siblings()
            .filter(|sibling| sibling.value().is_element())
            .count()
            + 1;
        segments.push(format!("{tag}:nth-child({position})"));

        current = el.parent().and_then(ElementRef::wrap);
    }

    segments.reverse();
    segments.join(" > ")
}

fn id_selector(id: &str) -> String {
    let plain = id
        .chars()
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if plain {
        format!("#{id}")
    } else {
        format!(r#"[id="{}"]"#, id.replace('\\', r"\\").replace('"', r#"\""#))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::SnapshotPage;

    const PRODUCT_PAGE: &str = r#"
        <html><body>
          <nav><a href="/account">Your account</a></nav>
          <h1>Waxed Canvas Field Boot</h1>
          <form action="/cart/add" method="post">
            <input type="hidden" name="id" value="42">
            <button class="btn">Add</button>
          </form>
          <button id="buy-now">Buy it</button>
          <a class="link" href="/checkout?step=1">Checkout</a>
          <button id="dineed-yes">Add to cart</button>
          <button>Share</button>
        </body></html>
    "#;

    fn detector() -> IntentDetector {
        IntentDetector::new(DetectorPatterns::default())
    }

    #[test]
    fn scan_finds_purchase_controls_only() {
        let page = SnapshotPage::new("https://shop.example/p/boot", PRODUCT_PAGE);
        let mut detector = detector();

        let report = detector.scan(&page, &[]);
        assert_eq!(report.found, 3);
        assert_eq!(report.attached, 3);

        let selectors: Vec<_> = detector.watched().iter().map(|c| c.selector.clone()).collect();
        assert!(selectors.contains(&"#buy-now".to_string()));
        assert!(!selectors.iter().any(|s| s.contains("dineed")));

        let link = detector
            .watched()
            .into_iter()
            .find(|c| c.tag == "a")
            .cloned()
            .unwrap();
        assert_eq!(link.href.as_deref(), Some("https://shop.example/checkout?step=1"));

        let form_button = detector
            .watched()
            .into_iter()
            .find(|c| c.form.is_some())
            .cloned()
            .unwrap();
        assert_eq!(form_button.form.unwrap().action.as_deref(), Some("/cart/add"));
    }

    #[test]
    fn repeated_scans_attach_once() {
        let page = SnapshotPage::new("https://shop.example/p/boot", PRODUCT_PAGE);
        let mut detector = detector();

        detector.scan(&page, &[]);
        let second = detector.scan(&page, &[]);
        let third = detector.scan(&page, &[]);
        assert_eq!(second.attached, 0);
        assert_eq!(third.attached, 0);

        for control in detector.watched() {
            assert_eq!(page.listener_count(&control.control_id), 1);
        }
    }

    #[test]
    fn scan_picks_up_controls_added_later() {
        let page = SnapshotPage::new(
            "https://shop.example/p/boot",
            "<html><body><div id=\"buybox\"></div></body></html>",
        );
        let mut detector = detector();
        assert_eq!(detector.scan(&page, &[]).found, 0);

        page.set_html(
            r#"<html><body><div id="buybox"><button class="add-to-cart">Add</button></div></body></html>"#,
        );
        let report = detector.scan(&page, &[]);
        assert_eq!(report.attached, 1);
        assert_eq!(
            detector.watched()[0].selector,
            "#buybox > button:nth-child(1)"
        );
    }

    #[test]
    fn removed_control_is_reattached_when_it_returns() {
        let with_button =
            r#"<html><body><button id="add-to-cart-button">Add to Cart</button></body></html>"#;
        let page = SnapshotPage::new("https://shop.example/p/boot", with_button);
        let mut detector = detector();
        detector.scan(&page, &[]);
        let id = detector.watched()[0].control_id.clone();

        page.set_html("<html><body><p>Loading</p></body></html>");
        assert_eq!(detector.scan(&page, &[]).detached, 1);
        assert!(detector.watched().is_empty());
        assert_eq!(page.listener_count(&id), 0);

        page.set_html(with_button);
        assert_eq!(detector.scan(&page, &[]).attached, 1);
        assert_eq!(page.listener_count(&id), 1);
    }

    #[test]
    fn node_that_stops_matching_keeps_its_single_listener() {
        let buy = r#"<html><body><button class="add-to-cart">Add</button></body></html>"#;
        let share = "<html><body><button>Share</button></body></html>";
        let page = SnapshotPage::new("https://shop.example/p/boot", buy);
        let mut detector = detector();
        detector.scan(&page, &[]);
        let id = detector.watched()[0].control_id.clone();

        // same path, same tag: the node (and its listener) is still there
        page.set_html(share);
        let report = detector.scan(&page, &[]);
        assert_eq!(report.found, 0);
        assert_eq!(report.detached, 0);
        assert_eq!(page.listener_count(&id), 1);

        page.set_html(buy);
        assert_eq!(detector.scan(&page, &[]).attached, 0);
        assert_eq!(page.listener_count(&id), 1);
    }

    #[test]
    fn site_selectors_qualify_without_keywords() {
        let page = SnapshotPage::new(
            "https://www.amazon.com/dp/B0001",
            r#"<html><body><span class="a-button"><input class="a-button-input" name="submit.add-to-cart" type="image"></span></body></html>"#,
        );
        let mut detector = IntentDetector::new(DetectorPatterns {
            name_terms: Vec::new(),
            ..DetectorPatterns::default()
        });

        assert_eq!(detector.scan(&page, &[]).found, 0);
        let report = detector.scan(
            &page,
            &[r#".a-button-input[name="submit.add-to-cart"]"#.to_string()],
        );
        assert_eq!(report.found, 1);
        assert_eq!(report.attached, 1);
    }

    #[test]
    fn classification_fails_open_on_long_text() {
        let long_text = format!("Checkout {}", "great deals ".repeat(20));
        let html = format!(r#"<html><body><a href="/promo">{long_text}</a></body></html>"#);
        let page = SnapshotPage::new("https://shop.example/", &html);

        assert_eq!(detector().scan(&page, &[]).found, 0);
    }

    #[test]
    fn submit_buttons_qualify_by_form_action_or_name() {
        let html = r#"<html><body>
            <form action="/newsletter"><button type="submit">Go</button></form>
            <form action="/newsletter"><input type="submit" name="buy" value="Go"></form>
            <form action="/basket/checkout"><input type="submit" value="Go"></form>
        </body></html>"#;
        let page = SnapshotPage::new("https://shop.example/", html);

        assert_eq!(detector().scan(&page, &[]).found, 2);
    }

    #[test]
    fn odd_ids_are_quoted() {
        assert_eq!(id_selector("add-to-cart"), "#add-to-cart");
        assert_eq!(id_selector("1st"), r#"[id="1st"]"#);
        assert_eq!(id_selector(r#"a"b"#), r#"[id="a\"b"]"#);
    }
}
