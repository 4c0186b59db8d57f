//! HTML pages rendered with [maud](https://maud.lambda.xyz/). All dynamic
//! values are escaped by the template macro.

use maud::{html, Markup, DOCTYPE};

use crate::captcha::Provider;

const STYLESHEET: &str = "/assets/css/styles.css";
const FORM_SCRIPT: &str = "/assets/js/form.js";
const RECAPTCHA_SCRIPT: &str = "https://www.google.com/recaptcha/api.js";
const HCAPTCHA_SCRIPT: &str = "https://js.hcaptcha.com/1/api.js";

/// Everything the contact form page needs from the request.
pub struct FormView<'a> {
    pub nonce: &'a str,
    pub captcha: Option<(Provider, &'a str)>,
    pub dark: bool,
    pub domain: &'a str,
    pub url: &'a str,
}

fn layout(title: &str, dark: bool, head_extra: Markup, content: Markup) -> Markup {
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="utf-8";
                meta name="viewport" content="width=device-width, initial-scale=1";
                meta name="robots" content="noindex";
                title { (title) }
                link rel="stylesheet" href=(STYLESHEET);
                (head_extra)
            }
            body class=[dark.then_some("dark")] {
                main class="contact" {
                    (content)
                }
            }
        }
    }
}

fn action(dark: bool) -> &'static str {
    if dark {
        "/?dark=true"
    } else {
        "/"
    }
}

pub fn form_page(view: &FormView<'_>) -> Markup {
    let oembed_href = format!(
        "{}/services/oembed?url={}",
        view.domain,
        url::form_urlencoded::byte_serialize(view.url.as_bytes()).collect::<String>()
    );
    let theme = if view.dark { "dark" } else { "light" };

    let head_extra = html! {
        link rel="alternate" type="application/json+oembed" href=(oembed_href) title="Contact";
        script nonce=(view.nonce) src=(FORM_SCRIPT) {}
        @match view.captcha {
            Some((Provider::Recaptcha, _)) => {
                script nonce=(view.nonce) src=(RECAPTCHA_SCRIPT) defer {}
            }
            Some((Provider::HCaptcha, _)) => {
                script nonce=(view.nonce) src=(HCAPTCHA_SCRIPT) defer {}
            }
            None => {}
        }
    };

    let content = html! {
        form id="contactForm" method="post" action=(action(view.dark)) {
            label for="name" { "Name" }
            input id="name" name="name" type="text" autocomplete="name" required;

            label for="email" { "Email" }
            input id="email" name="email" type="email" autocomplete="email" required;

            label for="message" { "Message" }
            textarea id="message" name="message" rows="8" required {}

            @match view.captcha {
                Some((Provider::Recaptcha, site_key)) => {
                    div class="g-recaptcha" data-sitekey=(site_key) data-theme=(theme) data-callback="unblockSend" {}
                }
                Some((Provider::HCaptcha, site_key)) => {
                    div class="h-captcha" data-sitekey=(site_key) data-theme=(theme) data-callback="unblockSend" {}
                }
                None => {}
            }

            button id="sendBtn" type="submit" disabled[view.captcha.is_some()] { "Send" }
        }
    };

    layout("Contact", view.dark, head_extra, content)
}

pub fn result_page(header: &str, text: &str, dark: bool) -> Markup {
    let content = html! {
        h1 { (header) }
        p { (text) }
        a href=(action(dark)) { "Back" }
    };

    layout(header, dark, html! {}, content)
}

pub fn rate_limit_page(text: &str, dark: bool) -> Markup {
    let content = html! {
        h1 { "Slow down" }
        p { (text) }
    };

    layout("Too many requests", dark, html! {}, content)
}
