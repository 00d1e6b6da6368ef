//! Heuristic page classification from URL and visible text.

use serde::{Deserialize, Serialize};

use crate::surface::PageSnapshot;

/// Rough category of a page in a checkout flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageCategory {
    Checkout,
    Cart,
    Product,
    Unknown,
}

impl PageCategory {
    /// Target category named by a free-text step hint. Anything that does not
    /// mention the cart or a product page targets checkout.
    pub fn from_hint(hint: Option<&str>) -> Self {
        let Some(hint) = hint else {
            return PageCategory::Checkout;
        };
        let hint = hint.to_lowercase();
        if hint.contains("checkout") {
            PageCategory::Checkout
        } else if hint.contains("cart") || hint.contains("basket") {
            PageCategory::Cart
        } else if hint.contains("product") {
            PageCategory::Product
        } else {
            PageCategory::Checkout
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PageCategory::Checkout => "checkout",
            PageCategory::Cart => "cart",
            PageCategory::Product => "product",
            PageCategory::Unknown => "unknown",
        }
    }
}

/// Keyword tables behind [`PageClassifier::classify`].
#[derive(Debug, Clone)]
pub struct PageClassifier {
    checkout_text: Vec<String>,
    not_checkout_text: Vec<String>,
    cart_text: Vec<String>,
}

impl Default for PageClassifier {
    fn default() -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            checkout_text: owned(&[
                "shipping address",
                "billing address",
                "delivery address",
                "payment method",
                "place order",
                "complete order",
            ]),
            not_checkout_text: owned(&["shop now", "featured products"]),
            cart_text: owned(&["shopping cart", "your cart", "shopping bag", "your bag"]),
        }
    }
}

impl PageClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classify(&self, page: &PageSnapshot) -> PageCategory {
        let url = page.url.to_lowercase();
        let text = page.text.to_lowercase();

        if self.is_checkout(&url, &text) {
            PageCategory::Checkout
        } else if url.contains("/cart")
            || url.contains("/basket")
            || self.cart_text.iter().any(|k| text.contains(k))
        {
            PageCategory::Cart
        } else if url.contains("/product") || url.contains("/p/") || text.contains("add to cart") {
            PageCategory::Product
        } else {
            PageCategory::Unknown
        }
    }

    pub fn matches(&self, page: &PageSnapshot, target: PageCategory) -> bool {
        self.classify(page) == target
    }

    // Checkout evidence must not come from a product or landing page that
    // merely links to checkout.
    fn is_checkout(&self, url: &str, text: &str) -> bool {
        let looks_like_checkout = (url.contains("checkout") && !url.contains("/cart"))
            || self.checkout_text.iter().any(|k| text.contains(k));
        let looks_like_catalog = url.contains("/product")
            || self.not_checkout_text.iter().any(|k| text.contains(k));
        looks_like_checkout && !looks_like_catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(url: &str, text: &str) -> PageSnapshot {
        PageSnapshot {
            url: url.to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_checkout_by_url() {
        let c = PageClassifier::new();
        assert_eq!(
            c.classify(&page("https://shop.example.com/checkout", "")),
            PageCategory::Checkout
        );
        assert_eq!(
            c.classify(&page("https://shop.example.com/secure/checkout/step1", "")),
            PageCategory::Checkout
        );
    }

    #[test]
    fn test_checkout_by_text() {
        let c = PageClassifier::new();
        let p = page("https://shop.example.com/s/123", "Enter your Shipping Address below");
        assert_eq!(c.classify(&p), PageCategory::Checkout);
    }

    #[test]
    fn test_landing_page_with_checkout_link_is_not_checkout() {
        let c = PageClassifier::new();
        let p = page(
            "https://shop.example.com/checkout-deals",
            "Featured products. Shop now!",
        );
        assert_ne!(c.classify(&p), PageCategory::Checkout);
    }

    #[test]
    fn test_product_url_never_checkout() {
        let c = PageClassifier::new();
        let p = page("https://shop.example.com/products/tee", "Place order in one click");
        assert_eq!(c.classify(&p), PageCategory::Product);
    }

    #[test]
    fn test_cart_page() {
        let c = PageClassifier::new();
        assert_eq!(
            c.classify(&page("https://shop.example.com/cart", "")),
            PageCategory::Cart
        );
        assert_eq!(
            c.classify(&page("https://shop.example.com/cart/checkout-summary", "")),
            PageCategory::Cart
        );
    }

    #[test]
    fn test_unknown_page() {
        let c = PageClassifier::new();
        assert_eq!(
            c.classify(&page("https://shop.example.com/", "Welcome")),
            PageCategory::Unknown
        );
    }

    #[test]
    fn test_target_from_hint() {
        assert_eq!(PageCategory::from_hint(None), PageCategory::Checkout);
        assert_eq!(
            PageCategory::from_hint(Some("Proceed to checkout")),
            PageCategory::Checkout
        );
        assert_eq!(PageCategory::from_hint(Some("View cart")), PageCategory::Cart);
        assert_eq!(
            PageCategory::from_hint(Some("fill shipping form")),
            PageCategory::Checkout
        );
    }
}
