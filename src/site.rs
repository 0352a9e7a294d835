//! Marketplace-specific selectors and URL layout.
//!
//! Everything site-shaped lives here so a markup change is a one-file
//! fix. Selectors are ordered by reliability where more than one exists.

/// Links to item pages on a catalog listing.
pub const PRODUCT_LINK_SELECTOR: &str = "a[data-testid='product-card-title']";

/// Item page title.
pub const DETAIL_TITLE_SELECTOR: &str = "h1#product-title";

/// Deepest breadcrumb entry on an item page, used as the category title.
pub const CATEGORY_SELECTOR: &str = "ul.c-breadcrumb__list li:last-child a";

/// Active preview image on an item page.
pub const PREVIEW_IMAGE_SELECTOR: &str = "div.fotorama__active img";

/// Direct PDF link on an item page, when the item ships one.
pub const PDF_LINK_SELECTOR: &str = "a.c-button--grey-purple";

/// Publication timestamp, from the datetime attribute.
pub const PUBLISHED_AT_SELECTOR: &str = "time[datetime]";

/// Download control strategies, most specific first.
pub const DOWNLOAD_BUTTON_SELECTORS: &[&str] = &[
    "a[data-testid='download-button']",
    "a.c-button--download",
    "button.download-product",
];

/// Page-level submit control that fires the blocked action once the
/// verification widget is gone.
pub const CHALLENGE_SUBMIT_SELECTOR: &str = "button[type='submit'].c-button--green";

/// Markers that identify the verification interstitial.
pub const CHALLENGE_MARKERS: &[&str] = &[
    "iframe[src*='recaptcha']",
    "div.g-recaptcha",
    "div[data-testid='challenge-container']",
];

/// Listing URL for page `n`; page 1 is the bare base URL.
pub fn page_url(base_url: &str, page: u32) -> String {
    let base = base_url.trim_end_matches('/');
    if page <= 1 {
        base.to_string()
    } else {
        format!("{}/page/{}", base, page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_page_is_the_bare_base() {
        assert_eq!(
            page_url("https://market.example/embroidery/", 1),
            "https://market.example/embroidery"
        );
    }

    #[test]
    fn later_pages_get_a_path_suffix() {
        assert_eq!(
            page_url("https://market.example/embroidery", 7),
            "https://market.example/embroidery/page/7"
        );
    }
}
