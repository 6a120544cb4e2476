// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Headers ACLs are matched against

use acl::PacketHeader;
use flow_entry::FlowEntry;

/// Header of the packets of `flow`
#[must_use]
pub fn packet_header(flow: &FlowEntry) -> PacketHeader<'_> {
    let key = flow.key();
    let data = &flow.data;
    PacketHeader::new(
        data.vrf,
        key.protocol(),
        key.src_addr,
        key.dst_addr,
        key.src_port,
        key.dst_port,
    )
    .with_vns(&data.source_vn_list, &data.dest_vn_list)
    .with_sgs(&data.source_sg_id_l, &data.dest_sg_id_l)
    .with_tags(&data.source_tags, &data.dest_tags)
}

/// Header of the packets of a flow as seen on the far side of its translation,
/// derived from the paired flow `other`. Without NAT this equals the
/// flow's own header apart from the vrf.
#[must_use]
pub fn out_packet_header(other: &FlowEntry) -> PacketHeader<'_> {
    let key = other.key();
    let data = &other.data;
    PacketHeader::new(
        data.vrf,
        key.protocol(),
        key.dst_addr,
        key.src_addr,
        key.dst_port,
        key.src_port,
    )
    .with_vns(&data.dest_vn_list, &data.source_vn_list)
    .with_sgs(&data.dest_sg_id_l, &data.source_sg_id_l)
    .with_tags(&data.dest_tags, &data.source_tags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use etherparse::IpNumber;
    use flow_entry::{FlowFlags, FlowKey};

    #[test]
    fn test_out_header_uses_translated_tuple() {
        let key = FlowKey::new(
            1,
            IpNumber::TCP,
            "10.0.0.5".parse().unwrap(),
            "203.0.113.7".parse().unwrap(),
            1234,
            80,
        );
        // reverse of a destination-NAT'd flow: 10.0.0.9:8080 -> 10.0.0.5:1234
        let rkey = FlowKey::new(
            2,
            IpNumber::TCP,
            "10.0.0.9".parse().unwrap(),
            "10.0.0.5".parse().unwrap(),
            8080,
            1234,
        );
        let mut flow = FlowEntry::new(key, FlowFlags::NAT);
        flow.data.source_vn_list = vec!["app".into()];
        let mut rflow = FlowEntry::new(rkey, FlowFlags::REVERSE);
        rflow.data.source_vn_list = vec!["db".into()];
        rflow.data.dest_vn_list = vec!["app".into()];

        let hdr = packet_header(&flow);
        assert_eq!(hdr.dst_port, 80);
        assert_eq!(hdr.src_policy_id, ["app".to_string()]);

        let out = out_packet_header(&rflow);
        assert_eq!(out.vrf, 2);
        assert_eq!(out.src_ip, key.src_addr);
        assert_eq!(out.dst_ip, "10.0.0.9".parse::<std::net::IpAddr>().unwrap());
        assert_eq!(out.dst_port, 8080);
        assert_eq!(out.dst_policy_id, ["db".to_string()]);
    }
}
