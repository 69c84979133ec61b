// SPDX-License-Identifier: MPL-2.0

//! Client-side validation of outbound packets.
//!
//! Protocol rules always apply. Limits that depend on the connection are only checked when
//! negotiated settings are available. `ExtendedValidation::AwsIotCoreDefaults` adds the AWS IoT
//! Core service limits on top.

use super::commands::{PublishCommand, SubscribeCommand, UnsubscribeCommand};
use super::error::{MqttClientError, MqttClientResult};
use super::opts::ExtendedValidation;
use super::settings::NegotiatedSettings;

const MAX_UTF8_STRING_LEN: usize = 65_535;

const AWS_IOT_CORE_MAX_TOPIC_LEN: usize = 256;
const AWS_IOT_CORE_MAX_TOPIC_SLASHES: usize = 7;
const AWS_IOT_CORE_MAX_SUBSCRIPTIONS: usize = 8;
const AWS_IOT_CORE_MAX_CLIENT_ID_LEN: usize = 128;
const AWS_RULES_PREFIX: &str = "$aws/rules/";

pub fn validate_client_id(client_id: &str, mode: ExtendedValidation) -> Result<(), String> {
    if client_id.len() > MAX_UTF8_STRING_LEN {
        return Err(format!("client id is {} bytes long", client_id.len()));
    }
    if mode == ExtendedValidation::AwsIotCoreDefaults
        && client_id.len() > AWS_IOT_CORE_MAX_CLIENT_ID_LEN
    {
        return Err(format!(
            "client id is {} bytes long, AWS IoT Core allows {}",
            client_id.len(),
            AWS_IOT_CORE_MAX_CLIENT_ID_LEN
        ));
    }
    Ok(())
}

pub fn validate_topic_name(topic: &str, mode: ExtendedValidation) -> Result<(), String> {
    check_utf8_string(topic, "topic")?;
    if topic.contains(['+', '#']) {
        return Err(format!("topic '{}' contains wildcards", topic));
    }
    if mode == ExtendedValidation::AwsIotCoreDefaults {
        check_aws_iot_core_topic(topic)?;
    }
    Ok(())
}

pub fn validate_topic_filter(filter: &str, mode: ExtendedValidation) -> Result<(), String> {
    check_utf8_string(filter, "topic filter")?;

    let levels: Vec<&str> = filter.split('/').collect();
    for (index, level) in levels.iter().enumerate() {
        if level.contains('#') && (*level != "#" || index != levels.len() - 1) {
            return Err(format!(
                "'#' must be the whole last level of topic filter '{}'",
                filter
            ));
        }
        if level.contains('+') && *level != "+" {
            return Err(format!(
                "'+' must occupy a whole level of topic filter '{}'",
                filter
            ));
        }
    }

    if mode == ExtendedValidation::AwsIotCoreDefaults {
        check_aws_iot_core_topic(filter)?;
    }
    Ok(())
}

fn check_utf8_string(value: &str, what: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err(format!("{} must not be empty", what));
    }
    if value.len() > MAX_UTF8_STRING_LEN {
        return Err(format!("{} is {} bytes long", what, value.len()));
    }
    if value.contains('\0') {
        return Err(format!("{} contains a null character", what));
    }
    Ok(())
}

fn check_aws_iot_core_topic(topic: &str) -> Result<(), String> {
    if topic.len() > AWS_IOT_CORE_MAX_TOPIC_LEN {
        return Err(format!(
            "'{}' is {} bytes long, AWS IoT Core allows {}",
            topic,
            topic.len(),
            AWS_IOT_CORE_MAX_TOPIC_LEN
        ));
    }

    // the basic ingest prefix does not count towards the depth limit
    let counted = match topic.strip_prefix(AWS_RULES_PREFIX) {
        Some(rest) => rest.split_once('/').map_or("", |(_, after_rule)| after_rule),
        None => topic,
    };
    let slashes = counted.matches('/').count();
    if slashes > AWS_IOT_CORE_MAX_TOPIC_SLASHES {
        return Err(format!(
            "'{}' has {} levels separators, AWS IoT Core allows {}",
            topic, slashes, AWS_IOT_CORE_MAX_TOPIC_SLASHES
        ));
    }
    Ok(())
}

pub fn validate_publish(
    publish: &PublishCommand,
    mode: ExtendedValidation,
    settings: Option<&NegotiatedSettings>,
) -> MqttClientResult<()> {
    let fail = |reason: String| MqttClientError::validation("publish", reason);

    validate_topic_name(&publish.topic_name, mode).map_err(fail)?;
    if publish.topic_alias == Some(0) {
        return Err(fail("topic alias 0 is not allowed".to_string()));
    }
    if let Some(response_topic) = &publish.properties.response_topic {
        validate_topic_name(response_topic, ExtendedValidation::None)
            .map_err(|reason| fail(format!("response topic: {}", reason)))?;
    }

    if let Some(settings) = settings {
        if publish.qos > settings.maximum_qos {
            return Err(fail(format!(
                "QoS {} exceeds the broker maximum of {}",
                publish.qos as u8, settings.maximum_qos as u8
            )));
        }
        if publish.retain && !settings.retain_available {
            return Err(fail("the broker does not support retained messages".to_string()));
        }
        let size = publish.encoded_len();
        if size > settings.maximum_packet_size_to_server as usize {
            return Err(fail(format!(
                "encoded size {} exceeds the broker maximum packet size {}",
                size, settings.maximum_packet_size_to_server
            )));
        }
    }
    Ok(())
}

pub fn validate_subscribe(
    subscribe: &SubscribeCommand,
    mode: ExtendedValidation,
    settings: Option<&NegotiatedSettings>,
) -> MqttClientResult<()> {
    let fail = |reason: String| MqttClientError::validation("subscribe", reason);

    if subscribe.subscriptions.is_empty() {
        return Err(fail("at least one subscription is required".to_string()));
    }
    if subscribe.subscription_identifier == Some(0) {
        return Err(fail("subscription identifier 0 is not allowed".to_string()));
    }
    if mode == ExtendedValidation::AwsIotCoreDefaults
        && subscribe.subscriptions.len() > AWS_IOT_CORE_MAX_SUBSCRIPTIONS
    {
        return Err(fail(format!(
            "{} subscriptions in one request, AWS IoT Core allows {}",
            subscribe.subscriptions.len(),
            AWS_IOT_CORE_MAX_SUBSCRIPTIONS
        )));
    }
    for subscription in &subscribe.subscriptions {
        validate_topic_filter(&subscription.topic_filter, mode).map_err(fail)?;
    }

    if let Some(settings) = settings {
        if subscribe.subscription_identifier.is_some()
            && !settings.subscription_identifiers_available
        {
            return Err(fail(
                "the broker does not support subscription identifiers".to_string(),
            ));
        }
        for subscription in &subscribe.subscriptions {
            let filter = &subscription.topic_filter;
            if !settings.wildcard_subscriptions_available && filter.contains(['+', '#']) {
                return Err(fail(format!(
                    "the broker does not support wildcard subscriptions ('{}')",
                    filter
                )));
            }
            if !settings.shared_subscriptions_available && filter.starts_with("$share/") {
                return Err(fail(format!(
                    "the broker does not support shared subscriptions ('{}')",
                    filter
                )));
            }
        }
        let size = subscribe.encoded_len();
        if size > settings.maximum_packet_size_to_server as usize {
            return Err(fail(format!(
                "encoded size {} exceeds the broker maximum packet size {}",
                size, settings.maximum_packet_size_to_server
            )));
        }
    }
    Ok(())
}

pub fn validate_unsubscribe(
    unsubscribe: &UnsubscribeCommand,
    mode: ExtendedValidation,
    settings: Option<&NegotiatedSettings>,
) -> MqttClientResult<()> {
    let fail = |reason: String| MqttClientError::validation("unsubscribe", reason);

    if unsubscribe.topic_filters.is_empty() {
        return Err(fail("at least one topic filter is required".to_string()));
    }
    for filter in &unsubscribe.topic_filters {
        validate_topic_filter(filter, mode).map_err(fail)?;
    }
    if let Some(settings) = settings {
        let size = unsubscribe.encoded_len();
        if size > settings.maximum_packet_size_to_server as usize {
            return Err(fail(format!(
                "encoded size {} exceeds the broker maximum packet size {}",
                size, settings.maximum_packet_size_to_server
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt_client::commands::QoS;
    use crate::mqtt_client::opts::ConnectOptions;
    use crate::mqtt_client::results::ConnAckPacket;

    const NONE: ExtendedValidation = ExtendedValidation::None;
    const IOT: ExtendedValidation = ExtendedValidation::AwsIotCoreDefaults;

    fn settings(connack: ConnAckPacket) -> NegotiatedSettings {
        NegotiatedSettings::resolve(&ConnectOptions::default(), None, &connack, None)
    }

    #[test]
    fn test_topic_names() {
        assert!(validate_topic_name("a/b/c", NONE).is_ok());
        assert!(validate_topic_name("/", NONE).is_ok());
        assert!(validate_topic_name("", NONE).is_err());
        assert!(validate_topic_name("a/+/c", NONE).is_err());
        assert!(validate_topic_name("a/#", NONE).is_err());
        assert!(validate_topic_name("a\0b", NONE).is_err());
    }

    #[test]
    fn test_topic_filters() {
        for ok in ["#", "+", "a/+/c", "a/b/#", "+/+", "$share/group/a/#"] {
            assert!(validate_topic_filter(ok, NONE).is_ok(), "{}", ok);
        }
        for bad in ["", "a/#/c", "a#", "a/b+", "#/a"] {
            assert!(validate_topic_filter(bad, NONE).is_err(), "{}", bad);
        }
    }

    #[test]
    fn test_aws_iot_core_limits() {
        assert!(validate_topic_name("1/2/3/4/5/6/7/8", IOT).is_ok());
        assert!(validate_topic_name("1/2/3/4/5/6/7/8/9", IOT).is_err());
        assert!(validate_topic_name("1/2/3/4/5/6/7/8/9", NONE).is_ok());

        // the rules prefix is not counted
        assert!(validate_topic_name("$aws/rules/my_rule/1/2/3/4/5/6/7/8", IOT).is_ok());
        assert!(validate_topic_name("$aws/rules/my_rule/1/2/3/4/5/6/7/8/9", IOT).is_err());

        let long = "t".repeat(257);
        assert!(validate_topic_name(&long, IOT).is_err());
        assert!(validate_topic_filter(&long, IOT).is_err());
        assert!(validate_topic_name(&long, NONE).is_ok());

        assert!(validate_client_id(&"c".repeat(128), IOT).is_ok());
        assert!(validate_client_id(&"c".repeat(129), IOT).is_err());
        assert!(validate_client_id(&"c".repeat(129), NONE).is_ok());
    }

    #[test]
    fn test_aws_iot_core_subscription_count() {
        let mut builder = SubscribeCommand::builder();
        for i in 0..9 {
            builder = builder.add_topic(format!("t/{}", i), QoS::AtMostOnce);
        }
        let subscribe = builder.build().unwrap();
        assert!(validate_subscribe(&subscribe, NONE, None).is_ok());
        let err = validate_subscribe(&subscribe, IOT, None).unwrap_err();
        assert!(matches!(err, MqttClientError::ValidationFailed { .. }));
    }

    #[test]
    fn test_publish_against_settings() {
        let limited = settings(ConnAckPacket {
            maximum_qos: Some(QoS::AtLeastOnce),
            retain_available: Some(false),
            maximum_packet_size: Some(64),
            ..Default::default()
        });

        let qos2 = PublishCommand::simple("a", &b"x"[..], QoS::ExactlyOnce, false);
        assert!(validate_publish(&qos2, NONE, None).is_ok());
        assert!(validate_publish(&qos2, NONE, Some(&limited)).is_err());

        let retained = PublishCommand::simple("a", &b"x"[..], QoS::AtLeastOnce, true);
        assert!(validate_publish(&retained, NONE, Some(&limited)).is_err());

        let big = PublishCommand::simple("a", vec![0u8; 100], QoS::AtMostOnce, false);
        assert!(validate_publish(&big, NONE, Some(&limited)).is_err());

        let fine = PublishCommand::simple("a", &b"x"[..], QoS::AtLeastOnce, false);
        assert!(validate_publish(&fine, NONE, Some(&limited)).is_ok());
    }

    #[test]
    fn test_subscribe_against_settings() {
        let limited = settings(ConnAckPacket {
            wildcard_subscriptions_available: Some(false),
            shared_subscriptions_available: Some(false),
            subscription_identifiers_available: Some(false),
            ..Default::default()
        });

        let wildcard = SubscribeCommand::single("a/#", QoS::AtMostOnce);
        assert!(validate_subscribe(&wildcard, NONE, Some(&limited)).is_err());

        let shared = SubscribeCommand::single("$share/g/a", QoS::AtMostOnce);
        assert!(validate_subscribe(&shared, NONE, Some(&limited)).is_err());

        let with_id = SubscribeCommand::builder()
            .add_topic("a", QoS::AtMostOnce)
            .with_subscription_id(3)
            .build()
            .unwrap();
        assert!(validate_subscribe(&with_id, NONE, Some(&limited)).is_err());

        let plain = SubscribeCommand::single("a/b", QoS::AtMostOnce);
        assert!(validate_subscribe(&plain, NONE, Some(&limited)).is_ok());
    }

    #[test]
    fn test_empty_requests() {
        assert!(validate_subscribe(&SubscribeCommand::default(), NONE, None).is_err());
        assert!(validate_unsubscribe(&UnsubscribeCommand::default(), NONE, None).is_err());
        assert!(
            validate_unsubscribe(&UnsubscribeCommand::from_topics(["a/+"]), NONE, None).is_ok()
        );
    }
}
